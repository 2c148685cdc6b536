//! Structured logging setup.
//!
//! Log lines carry consistent fields so aggregators can parse them:
//! - `timestamp`, `level`, `target`
//! - `service`: the configured service name (on the root span)
//! - `peer`: participant address, on every peer-related event

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Structured logger handle
pub struct StructuredLogger {
    _initialized: bool,
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Installing twice
/// is not an error: the first subscriber stays in place.
pub fn init_logging(config: &TelemetryConfig) -> Result<StructuredLogger, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(e.to_string()))?;

    let result = if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    match result {
        Ok(()) => {
            tracing::debug!(
                service = %config.service_name,
                json_logs = config.json_logs,
                "Structured logging configured"
            );
        }
        Err(e) => {
            tracing::debug!(error = %e, "Global subscriber already installed");
        }
    }

    Ok(StructuredLogger { _initialized: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_plain_and_json() {
        let plain = TelemetryConfig::default();
        assert!(init_logging(&plain).is_ok());

        let json = TelemetryConfig {
            json_logs: true,
            ..TelemetryConfig::default()
        };
        // Second install keeps the first subscriber and still succeeds.
        assert!(init_logging(&json).is_ok());
    }
}
