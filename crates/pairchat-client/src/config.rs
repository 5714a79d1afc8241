//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero configuration.
//! Invalid values are logged and ignored.

use std::path::PathBuf;
use std::time::Duration;

use pairchat_shared::LocalUser;
use pairchat_sync::SyncConfig;
use uuid::Uuid;

/// Where the local cache lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Platform data directory (`Database::open_default`).
    Default,
    Path(PathBuf),
    /// Nothing persisted; used by the demo and tests.
    InMemory,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Env: `PAIRCHAT_DB_PATH` (`:memory:` for an in-memory cache)
    /// Default: platform data directory.
    pub database: DatabaseLocation,

    /// Identity issued by the auth layer.
    /// Env: `PAIRCHAT_USER_ID`, `PAIRCHAT_USER_NAME`
    /// Default: a random id named "Me".
    pub user: LocalUser,

    /// Whether OS notifications are shown. The UI still receives
    /// notification events when disabled.
    /// Env: `PAIRCHAT_NOTIFICATIONS` (true/false)
    /// Default: `true`
    pub notifications_enabled: bool,

    /// Env: `PAIRCHAT_POLL_INTERVAL_SECS`, `PAIRCHAT_RETRY_CEILING`,
    /// `PAIRCHAT_REMOTE_TIMEOUT_SECS`
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database: DatabaseLocation::Default,
            user: LocalUser::new(Uuid::new_v4().to_string(), "Me"),
            notifications_enabled: true,
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("PAIRCHAT_DB_PATH") {
            let path = path.trim();
            config.database = match path {
                "" => DatabaseLocation::Default,
                ":memory:" => DatabaseLocation::InMemory,
                other => DatabaseLocation::Path(PathBuf::from(other)),
            };
        }

        if let Some(id) = lookup("PAIRCHAT_USER_ID") {
            let id = id.trim();
            if id.is_empty() {
                tracing::warn!("Empty PAIRCHAT_USER_ID, using a random id");
            } else {
                config.user.id = id.into();
            }
        }

        if let Some(name) = lookup("PAIRCHAT_USER_NAME") {
            let name = name.trim();
            if !name.is_empty() {
                config.user.display_name = name.to_string();
            }
        }

        if let Some(val) = lookup("PAIRCHAT_NOTIFICATIONS") {
            config.notifications_enabled = val != "false" && val != "0";
        }

        if let Some(secs) = parse_positive(&lookup, "PAIRCHAT_POLL_INTERVAL_SECS") {
            config.sync.poll_interval = Duration::from_secs(secs);
        }

        if let Some(n) = parse_positive(&lookup, "PAIRCHAT_RETRY_CEILING") {
            match u32::try_from(n) {
                Ok(n) => config.sync.retry_ceiling = n,
                Err(_) => tracing::warn!(value = n, "PAIRCHAT_RETRY_CEILING too large, using default"),
            }
        }

        if let Some(secs) = parse_positive(&lookup, "PAIRCHAT_REMOTE_TIMEOUT_SECS") {
            config.sync.remote_timeout = Duration::from_secs(secs);
        }

        // RUST_LOG is read by the tracing EnvFilter directly.

        config
    }
}

fn parse_positive<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
