//! Classifier client.

use async_trait::async_trait;
use aws_sdk_rekognition::error::DisplayErrorContext;
use aws_sdk_rekognition::types::{Image, S3Object};
use aws_sdk_rekognition::Client as RekognitionClient;
use aws_types::SdkConfig;
use tracing::{debug, instrument};

use crate::error::PipelineError;
use crate::model::{LabelResult, ObjectRef};

/// Maps a stored image to (label, confidence) pairs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Detect labels with confidence at or above `min_confidence`.
    ///
    /// Result order is whatever the provider returns.
    async fn detect_labels(
        &self,
        object: &ObjectRef,
        min_confidence: f32,
    ) -> Result<Vec<LabelResult>, PipelineError>;
}

/// Amazon Rekognition label detection
pub struct RekognitionClassifier {
    client: RekognitionClient,
}

impl RekognitionClassifier {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: RekognitionClient::new(sdk_config),
        }
    }
}

#[async_trait]
impl Classifier for RekognitionClassifier {
    #[instrument(skip(self), fields(object = %object))]
    async fn detect_labels(
        &self,
        object: &ObjectRef,
        min_confidence: f32,
    ) -> Result<Vec<LabelResult>, PipelineError> {
        let image = Image::builder()
            .s3_object(
                S3Object::builder()
                    .bucket(&object.bucket)
                    .name(&object.key)
                    .build(),
            )
            .build();

        let response = self
            .client
            .detect_labels()
            .image(image)
            .min_confidence(min_confidence)
            .send()
            .await
            .map_err(|e| {
                let invalid_object = e.as_service_error().is_some_and(|se| {
                    se.is_invalid_s3_object_exception() || se.is_invalid_image_format_exception()
                });
                if invalid_object {
                    PipelineError::InvalidObjectReference(format!(
                        "{object}: {}",
                        DisplayErrorContext(&e)
                    ))
                } else {
                    PipelineError::ClassifierUnavailable(DisplayErrorContext(&e).to_string())
                }
            })?;

        let labels: Vec<LabelResult> = response
            .labels()
            .iter()
            .filter_map(|label| {
                Some(LabelResult::new(label.name()?, label.confidence()?))
            })
            .collect();

        debug!(label_count = labels.len(), "Labels detected");
        Ok(labels)
    }
}
