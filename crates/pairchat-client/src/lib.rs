//! Client facade for pairchat: configuration, logging bootstrap, the shared
//! application state and the command surface a UI shell calls into.

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::{ClientConfig, DatabaseLocation};
pub use error::{ClientError, Result};
pub use events::{forward_events, to_ui_event, UiEvent};
pub use state::{AppState, Connectivity};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// per-crate levels.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("pairchat_client=debug,pairchat_sync=debug,pairchat_store=info,warn")
    });

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
