use aws_config::BehaviorVersion;
use aws_types::SdkConfig;
use tracing::debug;

use crate::config::AwsConfig;

/// Load shared AWS SDK configuration for the configured region
pub async fn load_sdk_config(config: &AwsConfig) -> SdkConfig {
    debug!(region = %config.region, "Loading AWS SDK configuration");

    aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .load()
        .await
}
