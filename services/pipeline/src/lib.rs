//! ImageViewer Pipeline - upload notifications and automatic image labeling
//!
//! Clients upload images straight to the object store with a presigned URL
//! and then confirm the upload. The confirmation becomes a notification on a
//! queue; the labeling worker picks it up, asks the classifier for labels and
//! writes them back onto the object as tags.
//!
//! ## Architecture
//!
//! ```text
//!  Client ──startUpload──▶ Upload        ──presign──▶ Object Store
//!     │                    Coordinator                    ▲   ▲
//!     └──endUpload───────▶     │                          │   │
//!                              ▼ publish                  │   │ put_tags
//!                        Notification ──receive──▶ Labeling   │
//!                           Queue     ◀───ack───── Worker ────┘
//!                                                    │
//!                                                    ▼ detect_labels
//!                                                Classifier
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use imageviewer_pipeline::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(classifier: Arc<dyn Classifier>) {
//! let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(30)));
//! let store = Arc::new(InMemoryObjectStore::new("images"));
//!
//! let worker = LabelingWorker::new(queue, store, classifier, WorkerSettings::default());
//! worker.run(CancellationToken::new()).await;
//! # }
//! ```

pub mod aws;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod model;
pub mod queue;
pub mod store;
pub mod worker;

// Re-export main types
pub use classifier::{Classifier, RekognitionClassifier};
pub use config::{
    AwsConfig, ConfigError, LabelingConfig, PipelineConfig, QueueConfig, ServiceConfig,
    UnsupportedTypePolicy,
};
pub use coordinator::{PresignedUpload, UploadCoordinator};
pub use error::PipelineError;
pub use memory::{InMemoryObjectStore, InMemoryQueue};
pub use model::{
    ImageObject, ImageTag, LabelResult, Notification, ObjectRef, StoredObject, UploadIntent,
};
pub use queue::{NotificationQueue, SqsNotificationQueue};
pub use store::{ObjectStore, S3ObjectStore};
pub use worker::{
    CycleReport, Disposition, LabelingWorker, MessageOutcome, RetryPolicy, WorkerSettings,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::classifier::Classifier;
    pub use crate::error::PipelineError;
    pub use crate::memory::{InMemoryObjectStore, InMemoryQueue};
    pub use crate::model::{ImageTag, LabelResult, ObjectRef, UploadIntent};
    pub use crate::queue::NotificationQueue;
    pub use crate::store::ObjectStore;
    pub use crate::worker::{LabelingWorker, WorkerSettings};
}
