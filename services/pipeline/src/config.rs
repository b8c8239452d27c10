//! Configuration for the labeling worker.
//!
//! Settings are layered: built-in defaults, then an optional config file,
//! then `LABELING__*` environment variables. The result is read once at
//! startup and handed to constructors; nothing reads configuration later.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable that overrides the minimum label confidence
pub const MIN_CONFIDENCE_ENV: &str = "MinConfidence";

/// Default minimum label confidence (0-100 scale)
pub const DEFAULT_MIN_CONFIDENCE: f32 = 70.0;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::LoadError(e.to_string())
    }
}

/// Main configuration for the labeling worker
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// AWS and bucket configuration
    #[serde(default)]
    pub aws: AwsConfig,
    /// Notification queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Labeling behavior
    #[serde(default)]
    pub labeling: LabelingConfig,
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

/// AWS region, endpoint and bucket settings
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// Bucket holding the uploaded images
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned upload URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// Notification queue settings
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue carrying upload notifications
    #[serde(default)]
    pub queue_url: String,
    /// Messages requested per receive (1-10)
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,
    /// Long-poll wait per receive in seconds (0-20)
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: i32,
    /// Queue that receives quarantined notifications
    pub dead_letter_queue_url: Option<String>,
}

/// What the worker does with objects whose extension is not supported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedTypePolicy {
    /// Log a warning and classify anyway
    #[default]
    BestEffort,
    /// Acknowledge without classifying
    Strict,
}

/// Labeling behavior
#[derive(Debug, Clone, Deserialize)]
pub struct LabelingConfig {
    /// Minimum label confidence (0-100)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Delay between poll cycles in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum tags written per object
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    /// Extensions treated as images, including the dot
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default)]
    pub unsupported_type_policy: UnsupportedTypePolicy,
    /// Deliveries allowed before a failing notification is quarantined
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
}

// Default value functions
fn default_service_name() -> String {
    "labeling-worker".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_messages() -> i32 {
    5
}

fn default_wait_time_secs() -> i32 {
    10
}

fn default_min_confidence() -> f32 {
    DEFAULT_MIN_CONFIDENCE
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_tags() -> usize {
    crate::model::MAX_TAGS
}

fn default_supported_extensions() -> Vec<String> {
    vec![".png".to_string(), ".jpg".to_string(), ".jpeg".to_string()]
}

fn default_max_receive_count() -> u32 {
    5
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

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: String::new(),
            max_messages: default_max_messages(),
            wait_time_secs: default_wait_time_secs(),
            dead_letter_queue_url: None,
        }
    }
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            poll_interval_secs: default_poll_interval_secs(),
            max_tags: default_max_tags(),
            supported_extensions: default_supported_extensions(),
            unsupported_type_policy: UnsupportedTypePolicy::default(),
            max_receive_count: default_max_receive_count(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from config files and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_environment(environment_source())
    }

    fn load_with_environment(environment: config::Environment) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/labeling").required(false))
            .add_source(config::File::with_name("/etc/imageviewer/labeling").required(false))
            .add_source(environment)
            .build()?;

        let config: PipelineConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the `MinConfidence` environment override.
    ///
    /// Called after logging is initialized so a rejected override is visible.
    pub fn apply_min_confidence_override(&mut self) {
        let override_value = std::env::var(MIN_CONFIDENCE_ENV).ok();
        self.labeling.min_confidence =
            resolve_min_confidence(override_value.as_deref(), self.labeling.min_confidence);
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aws.validate()?;
        self.queue.validate()?;

        if self.labeling.max_tags == 0 || self.labeling.max_tags > crate::model::MAX_TAGS {
            return Err(ConfigError::InvalidValue {
                key: "labeling.max_tags".to_string(),
                message: format!("must be between 1 and {}", crate::model::MAX_TAGS),
            });
        }

        Ok(())
    }
}

impl AwsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("aws.bucket".to_string()));
        }
        Ok(())
    }

    /// Presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.presigned_url_expiry_secs)
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("queue.queue_url".to_string()));
        }

        if !(1..=10).contains(&self.max_messages) {
            return Err(ConfigError::InvalidValue {
                key: "queue.max_messages".to_string(),
                message: format!("{} is outside 1..=10", self.max_messages),
            });
        }

        if !(0..=20).contains(&self.wait_time_secs) {
            return Err(ConfigError::InvalidValue {
                key: "queue.wait_time_secs".to_string(),
                message: format!("{} is outside 0..=20", self.wait_time_secs),
            });
        }

        Ok(())
    }

    /// Long-poll wait as Duration
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs.max(0) as u64)
    }
}

// LABELING__QUEUE__QUEUE_URL -> queue.queue_url
// LABELING__LABELING__SUPPORTED_EXTENSIONS=.png,.jpg -> labeling.supported_extensions
fn environment_source() -> config::Environment {
    config::Environment::with_prefix("LABELING")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("labeling.supported_extensions")
}

/// Apply a minimum-confidence override string on top of `default`.
///
/// A value that does not parse, or falls outside 0-100, is ignored with a
/// warning and the default is kept.
pub fn resolve_min_confidence(override_value: Option<&str>, default: f32) -> f32 {
    let raw = match override_value.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => {
            info!(min_confidence = default, "Using default minimum confidence");
            return default;
        }
    };

    match raw.parse::<f32>() {
        Ok(value) if (0.0..=100.0).contains(&value) => {
            info!(min_confidence = value, "Setting minimum confidence");
            value
        }
        Ok(value) => {
            warn!(
                value,
                default, "Minimum confidence override out of range, reverting to default"
            );
            default
        }
        Err(_) => {
            warn!(
                value = %raw,
                default, "Failed to parse minimum confidence override, reverting to default"
            );
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PipelineConfig {
        PipelineConfig {
            service: ServiceConfig::default(),
            aws: AwsConfig {
                bucket: "images".to_string(),
                ..Default::default()
            },
            queue: QueueConfig {
                queue_url: "https://sqs.us-east-1.amazonaws.com/123456789012/uploads".to_string(),
                ..Default::default()
            },
            labeling: LabelingConfig::default(),
        }
    }

    #[test]
    fn test_default_values() {
        let labeling = LabelingConfig::default();
        assert_eq!(labeling.min_confidence, 70.0);
        assert_eq!(labeling.poll_interval_secs, 5);
        assert_eq!(labeling.max_tags, 10);
        assert_eq!(labeling.unsupported_type_policy, UnsupportedTypePolicy::BestEffort);

        let queue = QueueConfig::default();
        assert_eq!(queue.max_messages, 5);
        assert_eq!(queue.wait_time_secs, 10);

        assert_eq!(AwsConfig::default().presigned_url_expiry(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_override_not_a_number_keeps_default() {
        assert_eq!(resolve_min_confidence(Some("not-a-number"), 70.0), 70.0);
    }

    #[test]
    fn test_override_applied() {
        assert_eq!(resolve_min_confidence(Some("85.5"), 70.0), 85.5);
        assert_eq!(resolve_min_confidence(Some(" 50 "), 70.0), 50.0);
    }

    #[test]
    fn test_override_missing_or_out_of_range() {
        assert_eq!(resolve_min_confidence(None, 70.0), 70.0);
        assert_eq!(resolve_min_confidence(Some("   "), 70.0), 70.0);
        assert_eq!(resolve_min_confidence(Some("150"), 70.0), 70.0);
        assert_eq!(resolve_min_confidence(Some("-1"), 70.0), 70.0);
    }

    #[test]
    fn test_validate_requires_bucket_and_queue() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.aws.bucket.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(key)) if key == "aws.bucket"
        ));

        let mut config = valid_config();
        config.queue.queue_url = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(key)) if key == "queue.queue_url"
        ));
    }

    #[test]
    fn test_validate_queue_limits() {
        let mut config = valid_config();
        config.queue.max_messages = 11;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        let mut config = valid_config();
        config.queue.wait_time_secs = 21;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_unsupported_type_policy_deserialize() {
        let policy: UnsupportedTypePolicy = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(policy, UnsupportedTypePolicy::Strict);
        let policy: UnsupportedTypePolicy = serde_json::from_str("\"best_effort\"").unwrap();
        assert_eq!(policy, UnsupportedTypePolicy::BestEffort);
    }

    #[test]
    fn test_supported_extensions_from_environment_list() {
        let mut vars = config::Map::new();
        vars.insert("LABELING__AWS__BUCKET".to_string(), "images".to_string());
        vars.insert(
            "LABELING__QUEUE__QUEUE_URL".to_string(),
            "https://sqs.us-east-1.amazonaws.com/123456789012/uploads".to_string(),
        );
        vars.insert(
            "LABELING__LABELING__SUPPORTED_EXTENSIONS".to_string(),
            ".png,.webp".to_string(),
        );

        let config =
            PipelineConfig::load_with_environment(environment_source().source(Some(vars)))
                .unwrap();

        assert_eq!(config.aws.bucket, "images");
        assert_eq!(
            config.labeling.supported_extensions,
            vec![".png".to_string(), ".webp".to_string()]
        );
    }
}
