//! Notification queue.
//!
//! Delivery is at-least-once. A received message stays hidden for the
//! queue's visibility timeout and comes back unless it is acknowledged, so
//! callers acknowledge only after the work it describes has been applied.

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use aws_sdk_sqs::Client as SqsClient;
use aws_types::SdkConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ConfigError;
use crate::error::PipelineError;
use crate::model::Notification;

/// Contract the pipeline needs from the notification queue
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Publish a message body
    async fn publish(&self, body: &str) -> Result<(), PipelineError>;

    /// Long-poll for up to `max_messages` notifications.
    ///
    /// Returns an empty batch when `wait` elapses or `cancel` fires.
    async fn receive_batch(
        &self,
        max_messages: i32,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Notification>, PipelineError>;

    /// Permanently remove a received message
    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), PipelineError>;
}

/// SQS-backed notification queue
pub struct SqsNotificationQueue {
    client: SqsClient,
    queue_url: String,
}

impl SqsNotificationQueue {
    /// Create a queue client bound to `queue_url`
    pub fn new(sdk_config: &SdkConfig, queue_url: &str) -> Result<Self, PipelineError> {
        if queue_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("queue.queue_url".to_string()).into());
        }

        info!(queue_url = %queue_url, "SQS notification queue initialized");

        Ok(Self {
            client: SqsClient::new(sdk_config),
            queue_url: queue_url.to_string(),
        })
    }

    async fn receive(
        &self,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<Notification>, PipelineError> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait.as_secs() as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| PipelineError::QueueUnavailable(DisplayErrorContext(&e).to_string()))?;

        let mut notifications = Vec::with_capacity(response.messages().len());
        for message in response.messages() {
            let Some(receipt_handle) = message.receipt_handle() else {
                warn!(message_id = ?message.message_id(), "Message has no receipt handle");
                continue;
            };

            let receive_count = message
                .attributes()
                .and_then(|a| a.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);

            notifications.push(Notification {
                message_id: message.message_id().unwrap_or_default().to_string(),
                body: message.body().unwrap_or_default().to_string(),
                receipt_handle: receipt_handle.to_string(),
                receive_count,
            });
        }

        Ok(notifications)
    }
}

#[async_trait]
impl NotificationQueue for SqsNotificationQueue {
    #[instrument(skip(self, body), fields(queue_url = %self.queue_url))]
    async fn publish(&self, body: &str) -> Result<(), PipelineError> {
        let response = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| PipelineError::QueueUnavailable(DisplayErrorContext(&e).to_string()))?;

        debug!(message_id = ?response.message_id(), "Message published");
        Ok(())
    }

    async fn receive_batch(
        &self,
        max_messages: i32,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Notification>, PipelineError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Receive cancelled");
                Ok(Vec::new())
            }
            result = self.receive(max_messages, wait) => result,
        }
    }

    #[instrument(skip(self), fields(queue_url = %self.queue_url))]
    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), PipelineError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| PipelineError::QueueUnavailable(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}
