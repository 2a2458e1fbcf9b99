//! Logging initialization and configuration.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system with tracing.
///
/// Sets up tracing-subscriber with environment-based filtering (RUST_LOG)
/// and a default filter that keeps the glint crates at debug level.
///
/// # Example
/// ```
/// glint_core::init_logging();
/// tracing::info!("renderer initialized");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,glint=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
