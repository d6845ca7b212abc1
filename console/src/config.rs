use gateway::GatewayConfig;
use gateway::config::ValidationError;
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

fn default_metrics_prefix() -> String {
    "rosterctl".to_string()
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    /// Overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct SessionConfig {
    pub token: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data: Config = serde_yaml::from_reader(file)?;
        data.gateway.validate()?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid gateway config: {0}")]
    InvalidGateway(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            gateway:
                base_url: https://console.example.com/api
                timeout_secs: 10
                read_retries: 1
            session:
                token: abc123
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(
            config.gateway.base_url.as_str(),
            "https://console.example.com/api"
        );
        assert_eq!(config.gateway.timeout_secs, 10);
        assert_eq!(config.gateway.read_retries, 1);
        assert_eq!(config.session.token.as_deref(), Some("abc123"));

        let metrics = config.common.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(metrics.prefix, "rosterctl");

        let logging = config.common.logging.expect("logging config");
        assert!(logging.sentry_dsn.is_some());
        assert_eq!(logging.filter, "info");
    }

    #[test]
    fn defaults() {
        let tmp = write_tmp_file("session:\n    token: t\n");
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.gateway, GatewayConfig::default());
        assert!(config.common.metrics.is_none());
        assert!(config.common.logging.is_none());
    }

    #[test]
    fn invalid_base_url() {
        let tmp = write_tmp_file("gateway:\n    base_url: \"mailto:admin@example.com\"\n");
        let err = Config::from_file(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGateway(_)));
    }

    #[test]
    fn parse_error() {
        let tmp = write_tmp_file("gateway: [not, a, map]\n");
        let err = Config::from_file(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/rosterctl.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }
}
