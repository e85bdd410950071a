//! Module that contains the logging helpers used by peers and the manager.
//!
//! Messages are usually built with [`color_print::cformat`] and forwarded to
//! [`tracing`], so the binaries decide where they end up.

use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Function that installs the global subscriber, honouring `RUST_LOG` (defaults to `info`).
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init();
}

/// Function that logs an informational message.
pub fn info(message: &str) {
    tracing::info!("{message}");
}

/// Function that logs a warning.
pub fn warn(message: &str) {
    tracing::warn!("{message}");
}

/// Function that logs an error.
pub fn error(message: &str) {
    tracing::error!("{message}");
}

/// Function that logs a debug message.
pub fn debug(message: &str) {
    tracing::debug!("{message}");
}
