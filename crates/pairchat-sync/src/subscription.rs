//! Cancellable subscription handles and the snapshot pump behind them.
//!
//! A pump task owns one remote subscription. It applies snapshots strictly
//! in delivery order (the next snapshot is not read until the previous one
//! is applied), resubscribes with exponential backoff when the stream ends,
//! and stops as soon as its [`Subscription`] is cancelled or dropped.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::remote::SnapshotStream;

/// Where a subscription is in its lifecycle.
///
/// The first snapshot after (re)subscribing only establishes the baseline:
/// it is applied to the cache but never produces notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Baselining,
    Active,
}

impl SubscriptionState {
    /// State to apply the next snapshot under; moves `self` to `Active`.
    pub fn advance(&mut self) -> SubscriptionState {
        std::mem::replace(self, SubscriptionState::Active)
    }

    pub fn is_baseline(self) -> bool {
        self == SubscriptionState::Baselining
    }
}

/// The two ends a pump needs: how to (re)subscribe and what to do with data.
#[async_trait]
pub(crate) trait SnapshotFeed: Send + 'static {
    type Record: Send + 'static;

    async fn subscribe(&mut self) -> Result<SnapshotStream<Self::Record>, RemoteError>;

    async fn apply(&mut self, snapshot: Vec<Self::Record>, state: SubscriptionState);

    async fn report_error(&mut self, error: &RemoteError);
}

/// Handle to a running subscription.
///
/// [`Subscription::cancel`] is idempotent and dropping the handle cancels it.
#[derive(Debug)]
pub struct Subscription {
    label: String,
    cancel_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop delivering snapshots. Safe to call any number of times.
    pub fn cancel(&self) {
        let first = self.cancel_tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
        if first {
            tracing::debug!(subscription = %self.label, "subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Cancel and wait for the pump task to finish.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(subscription = %self.label, error = %e, "subscription task failed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Start a pump for `feed` and return its handle.
pub(crate) fn spawn_pump<F: SnapshotFeed>(
    label: impl Into<String>,
    feed: F,
    config: &SyncConfig,
) -> Subscription {
    let label = label.into();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(run_pump(label.clone(), feed, config.clone(), cancel_rx));
    Subscription {
        label,
        cancel_tx,
        task: Some(task),
    }
}

/// Resolves once cancellation is requested or the handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run_pump<F: SnapshotFeed>(
    label: String,
    mut feed: F,
    config: SyncConfig,
    mut cancel: watch::Receiver<bool>,
) {
    let mut delay = config.resubscribe_backoff_min;

    loop {
        let opened = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            opened = feed.subscribe() => opened,
        };

        match opened {
            Ok(mut stream) => {
                tracing::debug!(subscription = %label, "subscribed");
                let mut state = SubscriptionState::Baselining;
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancelled(&mut cancel) => return,
                        next = stream.recv() => next,
                    };
                    match next {
                        Some(Ok(snapshot)) => {
                            feed.apply(snapshot, state.advance()).await;
                            delay = config.resubscribe_backoff_min;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(subscription = %label, error = %e, "snapshot delivery failed");
                            feed.report_error(&e).await;
                        }
                        None => {
                            tracing::info!(subscription = %label, "subscription stream ended");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(subscription = %label, error = %e, "subscribe failed");
                feed.report_error(&e).await;
            }
        }

        tracing::debug!(subscription = %label, delay_ms = delay.as_millis() as u64, "resubscribing after backoff");
        if !sleep_unless_cancelled(delay, &mut cancel).await {
            break;
        }
        delay = config.next_backoff(delay);
    }

    tracing::debug!(subscription = %label, "pump stopped");
}

/// Returns `false` if cancelled while sleeping.
async fn sleep_unless_cancelled(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
