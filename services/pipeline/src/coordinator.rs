//! Upload coordinator.
//!
//! Clients upload straight to the store with a presigned URL, then confirm
//! the upload here so a labeling notification is published.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::error::PipelineError;
use crate::model::UploadIntent;
use crate::queue::NotificationQueue;
use crate::store::ObjectStore;

/// A presigned upload URL and when it stops working
#[derive(Debug, Clone)]
pub struct PresignedUpload {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues upload URLs and publishes upload notifications
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn NotificationQueue>,
    url_expiry: Duration,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn NotificationQueue>,
        url_expiry: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            url_expiry,
        }
    }

    /// Issue a write URL scoped to the intent's key and content type.
    ///
    /// Does not reserve the key.
    #[instrument(skip(self), fields(bucket = %self.store.bucket()))]
    pub async fn issue_upload_url(
        &self,
        intent: &UploadIntent,
    ) -> Result<PresignedUpload, PipelineError> {
        validate_name(intent)?;

        let url = self
            .store
            .presign_put(&intent.name, &intent.content_type, self.url_expiry)
            .await?;

        let expires_at = Utc::now() + chrono::Duration::seconds(self.url_expiry.as_secs() as i64);

        info!(name = %intent.name, "Upload URL generated");
        Ok(PresignedUpload { url, expires_at })
    }

    /// Publish the notification that starts labeling. Not retried here.
    #[instrument(skip(self))]
    pub async fn confirm_upload(&self, intent: &UploadIntent) -> Result<(), PipelineError> {
        validate_name(intent)?;

        let body = serde_json::to_string(intent)
            .map_err(|e| PipelineError::MalformedPayload(e.to_string()))?;
        self.queue.publish(&body).await?;

        info!(name = %intent.name, "Upload notification published");
        Ok(())
    }
}

fn validate_name(intent: &UploadIntent) -> Result<(), PipelineError> {
    if intent.name.trim().is_empty() {
        return Err(PipelineError::InvalidObjectReference(
            "object name must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryObjectStore, InMemoryQueue};
    use tokio_util::sync::CancellationToken;

    fn coordinator(queue: Arc<InMemoryQueue>) -> UploadCoordinator {
        UploadCoordinator::new(
            Arc::new(InMemoryObjectStore::new("images")),
            queue,
            Duration::from_secs(24 * 60 * 60),
        )
    }

    #[tokio::test]
    async fn test_issue_upload_url_has_no_side_effects() {
        let queue = Arc::new(InMemoryQueue::new(Duration::ZERO));
        let coordinator = coordinator(queue.clone());

        let upload = coordinator
            .issue_upload_url(&UploadIntent::new("cat.jpg", "image/jpeg"))
            .await
            .unwrap();

        assert!(upload.url.contains("images/cat.jpg"));
        assert!(upload.url.contains("expires-in=86400"));
        assert!(upload.expires_at > Utc::now());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_upload_publishes_intent() {
        let queue = Arc::new(InMemoryQueue::new(Duration::ZERO));
        let coordinator = coordinator(queue.clone());
        let intent = UploadIntent::new("cat.jpg", "image/jpeg");

        coordinator.confirm_upload(&intent).await.unwrap();

        let batch = queue
            .receive_batch(5, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].upload_intent().unwrap(), intent);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let queue = Arc::new(InMemoryQueue::new(Duration::ZERO));
        let coordinator = coordinator(queue.clone());

        let result = coordinator
            .confirm_upload(&UploadIntent::new("  ", "image/png"))
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidObjectReference(_))));
        assert!(queue.is_empty());
    }
}
