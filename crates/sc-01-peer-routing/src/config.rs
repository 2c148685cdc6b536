//! Routing layer configuration.
//!
//! Loaded from a TOML file or built in code.
//!
//! # Config File Format
//!
//! ```toml
//! [routing]
//! dial_timeout_ms = 10000
//! receiver_capacity = 64
//! max_frame_len = 1048576
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::ConfigError;
use crate::{DEFAULT_MAX_FRAME_LEN, DEFAULT_RECEIVER_CAPACITY};

/// Configuration of a [`Registry`](crate::Registry) and the consumers it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Upper bound on a single outbound dial.
    pub dial_timeout: Duration,
    /// Queue capacity of receivers created from this config.
    pub receiver_capacity: usize,
    /// Largest envelope frame accepted by stream connections.
    pub max_frame_len: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            receiver_capacity: DEFAULT_RECEIVER_CAPACITY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    routing: RoutingSection,
}

#[derive(Debug, Deserialize, Default)]
struct RoutingSection {
    dial_timeout_ms: Option<u64>,
    receiver_capacity: Option<usize>,
    max_frame_len: Option<usize>,
}

impl RegistryConfig {
    /// Create config for testing with short timeouts and small queues.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            dial_timeout: Duration::from_millis(500),
            receiver_capacity: 8,
            max_frame_len: 64 * 1024,
        }
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let defaults = Self::default();
        let config = Self {
            dial_timeout: file
                .routing
                .dial_timeout_ms
                .map_or(defaults.dial_timeout, Duration::from_millis),
            receiver_capacity: file
                .routing
                .receiver_capacity
                .unwrap_or(defaults.receiver_capacity),
            max_frame_len: file.routing.max_frame_len.unwrap_or(defaults.max_frame_len),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Reject values the routing layer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dial_timeout.is_zero() {
            return Err(ConfigError::Invalid("dial_timeout must be non-zero".into()));
        }
        if self.receiver_capacity == 0 {
            return Err(ConfigError::Invalid(
                "receiver_capacity must be non-zero".into(),
            ));
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::Invalid("max_frame_len must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RegistryConfig::default().validate().is_ok());
        assert!(RegistryConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_from_toml_overrides() {
        let config = RegistryConfig::from_toml_str(
            r#"
            [routing]
            dial_timeout_ms = 250
            receiver_capacity = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.dial_timeout, Duration::from_millis(250));
        assert_eq!(config.receiver_capacity, 4);
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RegistryConfig::from_toml_str("").unwrap();
        assert_eq!(config, RegistryConfig::default());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = RegistryConfig::from_toml_str("[routing]\nreceiver_capacity = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let result = RegistryConfig::from_toml_str("[routing\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = RegistryConfig::from_file("/nonexistent/routing.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
