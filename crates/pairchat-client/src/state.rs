//! Application state shared by every command.
//!
//! [`AppState`] owns the opened cache, the connectivity source and the
//! running [`SyncService`]. A UI shell creates one at startup, keeps it for
//! the lifetime of the process and passes it to the command handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pairchat_shared::LocalUser;
use pairchat_store::Database;
use pairchat_sync::{
    share, ConnectivityProbe, ConnectivityWatcher, LogNotifier, ManualConnectivity,
    NotificationRequest, Notifier, PollingObserver, RemoteSyncSource, SharedDatabase, SyncEvent,
    SyncService,
};

use crate::config::{ClientConfig, DatabaseLocation};
use crate::error::Result;

/// Source of online/offline edges.
pub enum Connectivity {
    /// Fed by a platform network observer.
    Manual(ManualConnectivity),
    /// Portable fallback that probes at a fixed interval.
    Polling(PollingObserver),
}

impl Connectivity {
    pub fn manual(initially_online: bool) -> Self {
        Connectivity::Manual(ManualConnectivity::new(initially_online))
    }

    pub fn polling(probe: Arc<dyn ConnectivityProbe>, interval: Duration) -> Self {
        Connectivity::Polling(PollingObserver::spawn(probe, interval))
    }

    pub fn watcher(&self) -> ConnectivityWatcher {
        match self {
            Connectivity::Manual(manual) => manual.watcher(),
            Connectivity::Polling(polling) => polling.watcher(),
        }
    }

    /// Push a reading from the platform observer. Ignored when polling.
    pub fn report(&self, online: bool) {
        match self {
            Connectivity::Manual(manual) => {
                manual.set_online(online);
            }
            Connectivity::Polling(_) => {
                tracing::debug!(online, "connectivity report ignored while polling");
            }
        }
    }
}

/// Central application state.
pub struct AppState {
    config: ClientConfig,
    db: SharedDatabase,
    connectivity: Connectivity,
    service: SyncService,
}

impl AppState {
    /// Open the cache, start syncing and return the UI event stream.
    pub async fn start(
        config: ClientConfig,
        remote: Arc<dyn RemoteSyncSource>,
        connectivity: Connectivity,
    ) -> Result<(Self, mpsc::Receiver<SyncEvent>)> {
        let db = share(open_database(&config.database)?);

        let notifier: Arc<dyn Notifier> = if config.notifications_enabled {
            Arc::new(LogNotifier)
        } else {
            Arc::new(SilentNotifier)
        };

        let (service, events) = SyncService::start(
            db.clone(),
            remote,
            notifier,
            connectivity.watcher(),
            config.user.clone(),
            config.sync.clone(),
        )
        .await;

        tracing::info!(
            user = %config.user.id,
            name = %config.user.display_name,
            "Client started"
        );

        Ok((
            Self {
                config,
                db,
                connectivity,
                service,
            },
            events,
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn user(&self) -> &LocalUser {
        &self.config.user
    }

    pub fn service(&self) -> &SyncService {
        &self.service
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Stop syncing and close the cache.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            db,
            connectivity,
            service,
            ..
        } = self;

        service.shutdown().await;
        drop(connectivity);

        match Arc::try_unwrap(db) {
            Ok(db) => db.into_inner().close()?,
            // A background send still holds the handle; it closes on drop.
            Err(_) => tracing::debug!("database still shared at shutdown"),
        }
        tracing::info!("Client stopped");
        Ok(())
    }
}

fn open_database(location: &DatabaseLocation) -> Result<Database> {
    let db = match location {
        DatabaseLocation::Default => Database::open_default()?,
        DatabaseLocation::Path(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(pairchat_store::StoreError::from)?;
            }
            Database::open_at(path)?
        }
        DatabaseLocation::InMemory => Database::open_in_memory()?,
    };
    Ok(db)
}

/// Notifier used when OS notifications are switched off.
struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, request: NotificationRequest) {
        tracing::debug!(chat = %request.payload.chat_id, "Notification muted by settings");
    }
}
