//! Edge-triggered connectivity observation.
//!
//! Consumers only care about transitions: the queue drains when the device
//! goes from offline to online, not on every "still online" reading. Both
//! observers below publish through an [`EdgeDetector`] into a `watch`
//! channel, so [`ConnectivityWatcher::next_edge`] wakes once per real change.
//!
//! [`ManualConnectivity`] is for platforms with a native network observer
//! that can push state changes. [`PollingObserver`] is the portable fallback
//! that asks a [`ConnectivityProbe`] at a fixed interval.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEdge {
    WentOnline,
    WentOffline,
}

impl ConnectivityEdge {
    pub fn is_online(self) -> bool {
        self == ConnectivityEdge::WentOnline
    }
}

/// Turns a series of level readings into edges.
///
/// The first reading always counts as an edge, so a device that starts
/// online gets the same treatment as one that just came back.
#[derive(Debug, Default, Clone)]
pub struct EdgeDetector {
    last: Option<bool>,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, online: bool) -> Option<ConnectivityEdge> {
        if self.last == Some(online) {
            return None;
        }
        self.last = Some(online);
        Some(if online {
            ConnectivityEdge::WentOnline
        } else {
            ConnectivityEdge::WentOffline
        })
    }

    pub fn last(&self) -> Option<bool> {
        self.last
    }
}

/// Receiving side shared by every consumer.
#[derive(Debug, Clone)]
pub struct ConnectivityWatcher {
    rx: watch::Receiver<bool>,
}

impl ConnectivityWatcher {
    /// Current level.
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next transition. `None` once the observer is gone.
    pub async fn next_edge(&mut self) -> Option<ConnectivityEdge> {
        self.rx.changed().await.ok()?;
        let online = *self.rx.borrow_and_update();
        Some(if online {
            ConnectivityEdge::WentOnline
        } else {
            ConnectivityEdge::WentOffline
        })
    }
}

#[derive(Debug)]
struct Publisher {
    tx: watch::Sender<bool>,
    detector: Mutex<EdgeDetector>,
}

impl Publisher {
    /// The initial level is already known, so it is not reported as an edge.
    fn new(initial: bool) -> Self {
        let (tx, _) = watch::channel(initial);
        let mut detector = EdgeDetector::new();
        detector.observe(initial);
        Self {
            tx,
            detector: Mutex::new(detector),
        }
    }

    fn publish(&self, online: bool) -> Option<ConnectivityEdge> {
        let edge = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(online)?;
        self.tx.send_replace(online);
        tracing::info!(online, "connectivity changed");
        Some(edge)
    }

    fn watcher(&self) -> ConnectivityWatcher {
        ConnectivityWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

// ---------------------------------------------------------------------------
// Push-style observer
// ---------------------------------------------------------------------------

/// Connectivity driven by explicit calls from a platform observer (or tests).
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    publisher: Arc<Publisher>,
}

impl ManualConnectivity {
    pub fn new(initially_online: bool) -> Self {
        Self {
            publisher: Arc::new(Publisher::new(initially_online)),
        }
    }

    /// Report the current level; returns the edge if it changed.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEdge> {
        self.publisher.publish(online)
    }

    pub fn is_online(&self) -> bool {
        *self.publisher.tx.borrow()
    }

    pub fn watcher(&self) -> ConnectivityWatcher {
        self.publisher.watcher()
    }
}

// ---------------------------------------------------------------------------
// Polling observer
// ---------------------------------------------------------------------------

/// Anything that can answer "are we online right now".
#[async_trait]
pub trait ConnectivityProbe: Send + Sync + 'static {
    async fn is_online(&self) -> bool;
}

/// Online when a TCP connection to `addr` succeeds within `timeout`.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_online(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }
}

/// Polls a probe at a fixed interval and publishes edges.
///
/// Starts out offline; the first successful probe is reported as
/// [`ConnectivityEdge::WentOnline`]. The polling task stops when this handle
/// is dropped.
#[derive(Debug)]
pub struct PollingObserver {
    publisher: Arc<Publisher>,
    task: JoinHandle<()>,
}

impl PollingObserver {
    pub fn spawn(probe: Arc<dyn ConnectivityProbe>, interval: Duration) -> Self {
        let publisher = Arc::new(Publisher::new(false));
        let task = tokio::spawn(poll_loop(probe, interval, publisher.clone()));
        Self { publisher, task }
    }

    pub fn watcher(&self) -> ConnectivityWatcher {
        self.publisher.watcher()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for PollingObserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_loop(probe: Arc<dyn ConnectivityProbe>, interval: Duration, publisher: Arc<Publisher>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let online = probe.is_online().await;
        if let Some(edge) = publisher.publish(online) {
            tracing::debug!(?edge, "connectivity edge from poll");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_edges_only_on_change() {
        let mut detector = EdgeDetector::new();
        assert_eq!(detector.observe(true), Some(ConnectivityEdge::WentOnline));
        assert_eq!(detector.observe(true), None);
        assert_eq!(detector.observe(true), None);
        assert_eq!(detector.observe(false), Some(ConnectivityEdge::WentOffline));
        assert_eq!(detector.observe(false), None);
        assert_eq!(detector.observe(true), Some(ConnectivityEdge::WentOnline));
    }

    #[tokio::test]
    async fn test_manual_connectivity_is_edge_triggered() {
        let conn = ManualConnectivity::new(false);
        let mut watcher = conn.watcher();
        assert!(!watcher.is_online());

        assert_eq!(conn.set_online(false), None);
        assert_eq!(conn.set_online(true), Some(ConnectivityEdge::WentOnline));
        assert_eq!(conn.set_online(true), None);

        assert_eq!(watcher.next_edge().await, Some(ConnectivityEdge::WentOnline));
        assert!(watcher.is_online());

        // Nothing pending after repeated "still online" reports.
        let pending =
            tokio::time::timeout(Duration::from_millis(20), watcher.next_edge()).await;
        assert!(pending.is_err());
    }

    struct FlagProbe(AtomicBool);

    #[async_trait]
    impl ConnectivityProbe for FlagProbe {
        async fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_observer_reports_transitions() {
        let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
        let observer = PollingObserver::spawn(probe.clone(), Duration::from_secs(5));
        let mut watcher = observer.watcher();

        assert_eq!(watcher.next_edge().await, Some(ConnectivityEdge::WentOnline));

        probe.0.store(false, Ordering::SeqCst);
        assert_eq!(watcher.next_edge().await, Some(ConnectivityEdge::WentOffline));

        probe.0.store(true, Ordering::SeqCst);
        assert_eq!(watcher.next_edge().await, Some(ConnectivityEdge::WentOnline));

        observer.stop();
    }
}
