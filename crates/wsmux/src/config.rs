//! Transport configuration
//!
//! Configuration can be built in code, or loaded from a `toml` or `json`
//! file. Every loaded configuration is validated before it is returned.

use crate::error::{ConfigurationError, ConfigurationResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Complete configuration for a transport instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Host used by structured endpoints that do not name one
    pub default_host: String,
    /// Reconnect schedule
    pub reconnect: ReconnectConfig,
}

/// Fixed-interval, bounded reconnect schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay between reconnect attempts in milliseconds
    pub interval_ms: u64,
    /// Attempts made after an unplanned close before giving up (0 disables reconnection)
    pub max_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_host: DEFAULT_HOST.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            max_attempts,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl TransportConfig {
    /// Load configuration from file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigurationResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| ConfigurationError::FileNotFound {
                file_path: path.display().to_string(),
            })?;

        let config = Self::parse(&content, path.extension().and_then(|s| s.to_str()))?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str, extension: Option<&str>) -> ConfigurationResult<Self> {
        match extension {
            Some("toml") => toml::from_str(content).map_err(|e| ConfigurationError::ParseError {
                parse_error: e.to_string(),
            }),
            Some("json") => {
                serde_json::from_str(content).map_err(|e| ConfigurationError::ParseError {
                    parse_error: e.to_string(),
                })
            }
            _ => Err(ConfigurationError::InvalidParameter {
                parameter: "file_extension".to_string(),
                reason: "Unsupported file format. Use json or toml".to_string(),
            }),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigurationResult<()> {
        let mut errors = Vec::new();

        if self.default_host.trim().is_empty() {
            errors.push("default_host cannot be empty".to_string());
        }

        if self.reconnect.interval_ms == 0 {
            errors.push("reconnect.interval_ms must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(ConfigurationError::ValidationFailed {
                validation_errors: errors,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let config = TransportConfig {
            default_host: " ".to_string(),
            reconnect: ReconnectConfig {
                interval_ms: 0,
                max_attempts: 3,
            },
        };
        match config.validate() {
            Err(ConfigurationError::ValidationFailed { validation_errors }) => {
                assert_eq!(validation_errors.len(), 2);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config = TransportConfig::parse("[reconnect]\nmax_attempts = 3\n", Some("toml")).unwrap();
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.interval_ms, DEFAULT_RECONNECT_INTERVAL_MS);
        assert_eq!(config.default_host, DEFAULT_HOST);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(matches!(
            TransportConfig::parse("", Some("yaml")),
            Err(ConfigurationError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transport.json");
        tokio::fs::write(
            &path,
            r#"{"default_host":"game.local","reconnect":{"interval_ms":250,"max_attempts":4}}"#,
        )
        .await
        .unwrap();

        let config = TransportConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.default_host, "game.local");
        assert_eq!(config.reconnect, ReconnectConfig::new(Duration::from_millis(250), 4));
    }

    #[tokio::test]
    async fn test_missing_file_reported() {
        let result = TransportConfig::load_from_file("/nonexistent/transport.toml").await;
        assert!(matches!(result, Err(ConfigurationError::FileNotFound { .. })));
    }
}
