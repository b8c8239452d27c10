use imageviewer_pipeline::config::{AwsConfig, ConfigError, QueueConfig};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the storage API
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Bucket and AWS endpoint configuration
    #[serde(default)]
    pub aws: AwsConfig,
    /// Queue the upload notifications are published to
    #[serde(default)]
    pub queue: QueueConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest body accepted by direct writes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "storage-api".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/storage").required(false))
            .add_source(config::File::with_name("/etc/imageviewer/storage").required(false))
            // Override with environment variables
            // STORAGE__AWS__BUCKET -> aws.bucket
            .add_source(
                config::Environment::with_prefix("STORAGE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aws.validate()?;
        self.queue.validate()?;

        if self.api.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.max_upload_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        self.aws.presigned_url_expiry()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            service: ServiceConfig::default(),
            aws: AwsConfig {
                bucket: "images".to_string(),
                ..AwsConfig::default()
            },
            queue: QueueConfig {
                queue_url: "https://sqs.us-east-1.amazonaws.com/123/uploads".to_string(),
                ..QueueConfig::default()
            },
            api: ApiConfig::default(),
        }
    }

    #[test]
    fn test_default_values() {
        let api = ApiConfig::default();
        assert_eq!(api.port, 8080);
        assert!(api.cors_enabled);
        assert_eq!(api.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(ServiceConfig::default().name, "storage-api");
    }

    #[test]
    fn test_presigned_url_expiry_defaults_to_one_day() {
        assert_eq!(config().presigned_url_expiry(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_validate_requires_bucket_and_queue() {
        assert!(config().validate().is_ok());

        let mut missing_bucket = config();
        missing_bucket.aws.bucket.clear();
        assert!(matches!(
            missing_bucket.validate(),
            Err(ConfigError::MissingRequired(_))
        ));

        let mut missing_queue = config();
        missing_queue.queue.queue_url.clear();
        assert!(matches!(
            missing_queue.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_zero_upload_limit_rejected() {
        let mut config = config();
        config.api.max_upload_bytes = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
