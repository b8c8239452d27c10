//! Labeling worker.
//!
//! Polls the notification queue on a fixed interval, classifies each
//! referenced object and replaces its tag set with the result. A
//! notification is acknowledged only once its tags are written; anything
//! else leaves it on the queue for redelivery, or quarantines it when a
//! dead-letter queue is configured and the failure is not worth retrying.
//!
//! Per notification: `Received -> Classifying -> Tagging -> Acknowledged`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::classifier::Classifier;
use crate::config::{LabelingConfig, PipelineConfig, QueueConfig, UnsupportedTypePolicy};
use crate::error::PipelineError;
use crate::model::{build_tag_set, ImageTag, Notification, ObjectRef};
use crate::queue::NotificationQueue;
use crate::store::ObjectStore;

/// Result of processing one notification
#[derive(Debug)]
pub enum MessageOutcome {
    /// Tags were written
    Labeled {
        tags: Vec<ImageTag>,
        skipped_labels: usize,
    },
    /// Nothing to do for this object
    Skipped { reason: String },
    /// Failed in a way a later delivery may not
    Retryable(PipelineError),
    /// Failed in a way every delivery will
    Fatal(PipelineError),
}

impl MessageOutcome {
    fn from_error(err: PipelineError) -> Self {
        if err.is_retryable() {
            MessageOutcome::Retryable(err)
        } else {
            MessageOutcome::Fatal(err)
        }
    }
}

/// What happens to a notification after processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledge,
    LeaveForRedelivery,
    /// Forward to the dead-letter queue, then acknowledge
    Quarantine,
}

/// Decides the disposition of processed notifications
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Deliveries allowed before a retryable failure is quarantined
    pub max_receive_count: u32,
    /// Whether a dead-letter queue exists to quarantine into
    pub quarantine_enabled: bool,
}

impl RetryPolicy {
    pub fn decide(&self, outcome: &MessageOutcome, receive_count: u32) -> Disposition {
        match outcome {
            MessageOutcome::Labeled { .. } | MessageOutcome::Skipped { .. } => {
                Disposition::Acknowledge
            }
            _ if !self.quarantine_enabled => Disposition::LeaveForRedelivery,
            MessageOutcome::Fatal(_) => Disposition::Quarantine,
            MessageOutcome::Retryable(_) if receive_count >= self.max_receive_count => {
                Disposition::Quarantine
            }
            MessageOutcome::Retryable(_) => Disposition::LeaveForRedelivery,
        }
    }
}

/// Counts from a single poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub received: usize,
    pub acknowledged: usize,
    pub left_for_redelivery: usize,
    pub quarantined: usize,
    pub skipped: usize,
}

/// Worker settings, fixed at construction
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub max_messages: i32,
    pub wait_time: Duration,
    pub min_confidence: f32,
    pub max_tags: usize,
    pub supported_extensions: Vec<String>,
    pub unsupported_type_policy: UnsupportedTypePolicy,
    pub max_receive_count: u32,
}

impl WorkerSettings {
    pub fn new(queue: &QueueConfig, labeling: &LabelingConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(labeling.poll_interval_secs),
            max_messages: queue.max_messages,
            wait_time: queue.wait_time(),
            min_confidence: labeling.min_confidence,
            max_tags: labeling.max_tags,
            supported_extensions: labeling
                .supported_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            unsupported_type_policy: labeling.unsupported_type_policy,
            max_receive_count: labeling.max_receive_count,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::new(&QueueConfig::default(), &LabelingConfig::default())
    }
}

impl From<&PipelineConfig> for WorkerSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self::new(&config.queue, &config.labeling)
    }
}

/// Consumes upload notifications and tags the uploaded objects
pub struct LabelingWorker {
    queue: Arc<dyn NotificationQueue>,
    store: Arc<dyn ObjectStore>,
    classifier: Arc<dyn Classifier>,
    dead_letter: Option<Arc<dyn NotificationQueue>>,
    settings: WorkerSettings,
    policy: RetryPolicy,
}

impl LabelingWorker {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        store: Arc<dyn ObjectStore>,
        classifier: Arc<dyn Classifier>,
        settings: WorkerSettings,
    ) -> Self {
        let policy = RetryPolicy {
            max_receive_count: settings.max_receive_count,
            quarantine_enabled: false,
        };

        Self {
            queue,
            store,
            classifier,
            dead_letter: None,
            settings,
            policy,
        }
    }

    /// Quarantine failing notifications into `dead_letter`
    pub fn with_dead_letter_queue(mut self, dead_letter: Arc<dyn NotificationQueue>) -> Self {
        self.dead_letter = Some(dead_letter);
        self.policy.quarantine_enabled = true;
        self
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Errors inside a cycle are logged and never end the loop.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            min_confidence = self.settings.min_confidence,
            quarantine_enabled = self.policy.quarantine_enabled,
            "Starting labeling worker"
        );

        if !self.policy.quarantine_enabled {
            warn!("No dead-letter queue configured, failing notifications will be retried indefinitely");
        }

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            debug!("Worker cycle starting");
            let report = self.poll_once(&shutdown).await;
            // Next cycle starts a full interval after this one ends
            ticker.reset();
            if report.received > 0 {
                info!(
                    received = report.received,
                    acknowledged = report.acknowledged,
                    left_for_redelivery = report.left_for_redelivery,
                    quarantined = report.quarantined,
                    skipped = report.skipped,
                    "Worker cycle complete"
                );
            }
        }

        info!("Labeling worker stopped");
    }

    /// Run one receive-and-process cycle
    pub async fn poll_once(&self, shutdown: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();

        debug!("Reading new messages");
        let batch = match self
            .queue
            .receive_batch(self.settings.max_messages, self.settings.wait_time, shutdown)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Failed to receive notifications");
                metrics::counter!("labeling.receive.errors").increment(1);
                return report;
            }
        };

        report.received = batch.len();
        metrics::counter!("labeling.messages.received").increment(batch.len() as u64);

        for (index, notification) in batch.iter().enumerate() {
            if shutdown.is_cancelled() {
                info!(
                    remaining = batch.len() - index,
                    "Shutdown requested, leaving remaining notifications for redelivery"
                );
                report.left_for_redelivery += batch.len() - index;
                break;
            }

            let outcome = self.process_notification(notification).await;
            if matches!(outcome, MessageOutcome::Skipped { .. }) {
                report.skipped += 1;
            }

            match self.settle(notification, &outcome).await {
                Disposition::Acknowledge => report.acknowledged += 1,
                Disposition::LeaveForRedelivery => report.left_for_redelivery += 1,
                Disposition::Quarantine => report.quarantined += 1,
            }
        }

        report
    }

    /// Classify and tag the object a notification refers to
    #[instrument(
        skip(self, notification),
        fields(
            message_id = %notification.message_id,
            receive_count = notification.receive_count
        )
    )]
    pub async fn process_notification(&self, notification: &Notification) -> MessageOutcome {
        let intent = match notification.upload_intent() {
            Ok(intent) => intent,
            Err(e) => {
                error!(error = %e, body = %notification.body, "Failed to deserialize notification");
                return MessageOutcome::Fatal(PipelineError::MalformedPayload(e.to_string()));
            }
        };

        let object = ObjectRef {
            bucket: self.store.bucket().to_string(),
            key: intent.name.clone(),
        };

        if !self.is_supported(intent.extension().as_deref()) {
            match self.settings.unsupported_type_policy {
                UnsupportedTypePolicy::BestEffort => {
                    warn!(object = %object, "Object is not a supported image type");
                }
                UnsupportedTypePolicy::Strict => {
                    info!(object = %object, "Skipping unsupported image type");
                    metrics::counter!("labeling.messages.skipped").increment(1);
                    return MessageOutcome::Skipped {
                        reason: format!("{} is not a supported image type", intent.name),
                    };
                }
            }
        }

        match self.label_object(&object).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, object = %object, "Failed to label object");
                MessageOutcome::from_error(e)
            }
        }
    }

    async fn label_object(&self, object: &ObjectRef) -> Result<MessageOutcome, PipelineError> {
        info!(object = %object, "Looking for labels in image");

        let started = Instant::now();
        let labels = self
            .classifier
            .detect_labels(object, self.settings.min_confidence)
            .await?;
        metrics::histogram!("labeling.classify.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let selection = build_tag_set(&labels, self.settings.max_tags);
        for tag in &selection.tags {
            info!(label = %tag.key, confidence = %tag.value, "Found label");
        }
        for label in &selection.skipped {
            info!(
                label = %label.name,
                confidence = label.confidence,
                "Skipped label because the maximum number of tags has been reached"
            );
        }
        metrics::counter!("labeling.labels.skipped").increment(selection.skipped.len() as u64);

        self.store.put_tags(&object.key, &selection.tags).await?;

        Ok(MessageOutcome::Labeled {
            tags: selection.tags,
            skipped_labels: selection.skipped.len(),
        })
    }

    fn is_supported(&self, extension: Option<&str>) -> bool {
        extension.is_some_and(|ext| self.settings.supported_extensions.iter().any(|s| s == ext))
    }

    /// Apply the retry policy to a processed notification
    async fn settle(&self, notification: &Notification, outcome: &MessageOutcome) -> Disposition {
        let disposition = self.policy.decide(outcome, notification.receive_count);

        match disposition {
            Disposition::Acknowledge => {
                if let Err(e) = self.queue.acknowledge(&notification.receipt_handle).await {
                    // Redelivery re-tags with the same labels
                    error!(
                        error = %e,
                        message_id = %notification.message_id,
                        "Failed to acknowledge notification"
                    );
                    return Disposition::LeaveForRedelivery;
                }
                metrics::counter!("labeling.messages.acknowledged").increment(1);
                Disposition::Acknowledge
            }
            Disposition::LeaveForRedelivery => {
                warn!(
                    message_id = %notification.message_id,
                    receive_count = notification.receive_count,
                    "Leaving notification for redelivery"
                );
                metrics::counter!("labeling.messages.retried").increment(1);
                Disposition::LeaveForRedelivery
            }
            Disposition::Quarantine => self.quarantine(notification).await,
        }
    }

    async fn quarantine(&self, notification: &Notification) -> Disposition {
        let Some(dead_letter) = self.dead_letter.as_ref() else {
            return Disposition::LeaveForRedelivery;
        };

        if let Err(e) = dead_letter.publish(&notification.body).await {
            error!(
                error = %e,
                message_id = %notification.message_id,
                "Failed to forward notification to dead-letter queue"
            );
            return Disposition::LeaveForRedelivery;
        }

        if let Err(e) = self.queue.acknowledge(&notification.receipt_handle).await {
            // The copy in the dead-letter queue stays; redelivery may duplicate it
            error!(
                error = %e,
                message_id = %notification.message_id,
                "Failed to acknowledge quarantined notification"
            );
            return Disposition::LeaveForRedelivery;
        }

        warn!(
            message_id = %notification.message_id,
            receive_count = notification.receive_count,
            "Notification quarantined"
        );
        metrics::counter!("labeling.messages.quarantined").increment(1);
        Disposition::Quarantine
    }
}
