//! Log output setup.
//!
//! Library code logs through the `log` facade. `init_logging` installs a
//! tracing subscriber and forwards `log` records into it.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::settings::LoggingSettings;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Logging is already initialized")]
    AlreadyInitialized,
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the configured filter when set. Fails with
/// [`LoggingError::AlreadyInitialized`] if a global subscriber exists.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let configured =
        EnvFilter::try_new(&settings.level).map_err(|e| LoggingError::InvalidFilter {
            filter: settings.level.clone(),
            reason: e.to_string(),
        })?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(configured);

    let output = if settings.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(output);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    // a logger installed elsewhere keeps receiving `log` records
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("log records are not forwarded: {}", e);
    }

    tracing::debug!(json = settings.json, "Logging initialized");
    Ok(())
}
