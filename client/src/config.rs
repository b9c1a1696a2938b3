//! Client configuration.

use std::time::Duration;

/// Configuration for [`crate::LedgerClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long `execute` waits for a receipt before reporting a timeout.
    pub finalization_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            finalization_timeout: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("FINALIZATION_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                config.finalization_timeout = Duration::from_millis(ms);
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.finalization_timeout.is_zero() {
            return Err("Finalization timeout cannot be zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.finalization_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_timeout_invalid() {
        let config = ClientConfig {
            finalization_timeout: Duration::ZERO,
        };
        assert!(config.validate().is_err());
    }
}
