use serde::Deserialize;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("base URL cannot be a base for relative paths: {0}")]
    OpaqueBaseUrl(Url),
    #[error("timeout cannot be 0")]
    InvalidTimeout,
    #[error("read_retries cannot exceed {max}, got {0}", max = MAX_READ_RETRIES)]
    TooManyRetries(u32),
}

pub const MAX_READ_RETRIES: u32 = 10;

/// Remote collection gateway configuration.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct GatewayConfig {
    /// Base URL every resource path is resolved against.
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    /// Timeout applied to each HTTP request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How often a read is retried on a retriable status. Mutations are
    /// never retried.
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
}

fn default_base_url() -> Url {
    Url::parse("http://localhost:5000/api").expect("static URL")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_read_retries() -> u32 {
    3
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            read_retries: default_read_retries(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_url.cannot_be_a_base() {
            return Err(ValidationError::OpaqueBaseUrl(self.base_url.clone()));
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.read_retries > MAX_READ_RETRIES {
            return Err(ValidationError::TooManyRetries(self.read_retries));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.base_url.as_str(), "http://localhost:5000/api");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let config = GatewayConfig {
            base_url: Url::parse("mailto:admin@example.com").unwrap(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::OpaqueBaseUrl(_))
        ));

        let config = GatewayConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidTimeout)
        ));

        let config = GatewayConfig {
            read_retries: 64,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::TooManyRetries(64))
        ));
    }
}
