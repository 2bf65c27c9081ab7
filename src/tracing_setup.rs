//! Tracing subscriber setup
//!
//! Shared tracing configuration for applications embedding the file
//! systems and for tests.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber with file logging.
///
/// This sets up:
/// - File-based logging with the given log file
/// - Environment-based filtering (RUST_LOG) with DEBUG default
///
/// Fails if the log file cannot be created or a global subscriber is
/// already installed.
pub fn init_global(log_file_path: &Path) -> io::Result<()> {
    let log_file = File::create(log_file_path)?;
    build_subscriber(log_file)
        .try_init()
        .map_err(io::Error::other)
}

/// Build a subscriber writing to `log_file`.
///
/// This is the core subscriber configuration shared between production and tests.
pub fn build_subscriber(log_file: File) -> impl tracing::Subscriber + Send + Sync {
    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into());

    let fmt_layer = fmt::layer().with_ansi(false).with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
}
