//! In-process implementations of the store and queue contracts.
//!
//! Used by the test suites and for running the services without AWS. The
//! queue keeps SQS delivery semantics: visibility timeouts, receive counts
//! and a fresh receipt handle per delivery.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::{ImageObject, ImageTag, Notification, StoredObject};
use crate::queue::NotificationQueue;
use crate::store::ObjectStore;

#[derive(Debug, Clone)]
struct StoredEntry {
    body: Bytes,
    content_type: Option<String>,
    tags: Vec<ImageTag>,
    e_tag: String,
    last_modified: DateTime<Utc>,
}

/// Object store held in memory
#[derive(Debug)]
pub struct InMemoryObjectStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, StoredEntry>>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert an object directly, as a client upload through a presigned URL would
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.objects.write().insert(key.into(), new_entry(body.into(), None));
    }

    /// Current tags on `key`, or `None` if the object does not exist
    pub fn tags(&self, key: &str) -> Option<Vec<ImageTag>> {
        self.objects.read().get(key).map(|e| e.tags.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }
}

fn new_entry(body: Bytes, content_type: Option<String>) -> StoredEntry {
    StoredEntry {
        body,
        content_type,
        tags: Vec::new(),
        e_tag: format!("\"{}\"", Uuid::new_v4().simple()),
        last_modified: Utc::now(),
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_tags(&self, key: &str, tags: &[ImageTag]) -> Result<(), PipelineError> {
        let mut objects = self.objects.write();
        let entry = objects
            .get_mut(key)
            .ok_or_else(|| PipelineError::ObjectNotFound(key.to_string()))?;
        entry.tags = tags.to_vec();
        Ok(())
    }

    async fn get_tags(&self, key: &str) -> Result<Vec<ImageTag>, PipelineError> {
        self.tags(key)
            .ok_or_else(|| PipelineError::ObjectNotFound(key.to_string()))
    }

    async fn get_object(&self, key: &str) -> Result<StoredObject, PipelineError> {
        self.objects
            .read()
            .get(key)
            .map(|e| StoredObject {
                body: e.body.clone(),
                content_type: e.content_type.clone(),
            })
            .ok_or_else(|| PipelineError::ObjectNotFound(key.to_string()))
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> Result<(), PipelineError> {
        // A write replaces the object and with it the tag set
        self.objects
            .write()
            .insert(key.to_string(), new_entry(body, content_type));
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), PipelineError> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<ImageObject>, PipelineError> {
        Ok(self
            .objects
            .read()
            .iter()
            .map(|(key, e)| ImageObject {
                key: key.clone(),
                e_tag: e.e_tag.clone(),
                last_modified: Some(e.last_modified),
                size: e.body.len() as i64,
                tags: Vec::new(),
            })
            .collect())
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, PipelineError> {
        Ok(format!(
            "memory://{}/{}?content-type={}&expires-in={}",
            self.bucket,
            key,
            content_type,
            expires_in.as_secs()
        ))
    }
}

#[derive(Debug)]
struct QueuedMessage {
    message_id: String,
    body: String,
    receive_count: u32,
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
}

impl QueuedMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

/// At-least-once queue held in memory
#[derive(Debug)]
pub struct InMemoryQueue {
    visibility_timeout: Duration,
    messages: Mutex<Vec<QueuedMessage>>,
    published: Notify,
}

impl InMemoryQueue {
    /// Create a queue whose received messages stay hidden for `visibility_timeout`
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            messages: Mutex::new(Vec::new()),
            published: Notify::new(),
        }
    }

    /// Messages not yet acknowledged, in flight or not
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bodies of all messages not yet acknowledged
    pub fn bodies(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.body.clone()).collect()
    }

    fn take_visible(&self, max_messages: usize) -> (Vec<Notification>, Option<Instant>) {
        let now = Instant::now();
        let mut messages = self.messages.lock();
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for message in messages.iter_mut() {
            if batch.len() >= max_messages {
                break;
            }

            if !message.is_visible(now) {
                next_visible = match (next_visible, message.invisible_until) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                continue;
            }

            let receipt_handle = Uuid::new_v4().to_string();
            message.receive_count += 1;
            message.receipt_handle = Some(receipt_handle.clone());
            message.invisible_until = Some(now + self.visibility_timeout);

            batch.push(Notification {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                receipt_handle,
                receive_count: message.receive_count,
            });
        }

        (batch, next_visible)
    }
}

#[async_trait]
impl NotificationQueue for InMemoryQueue {
    async fn publish(&self, body: &str) -> Result<(), PipelineError> {
        self.messages.lock().push(QueuedMessage {
            message_id: Uuid::new_v4().to_string(),
            body: body.to_string(),
            receive_count: 0,
            receipt_handle: None,
            invisible_until: None,
        });
        self.published.notify_waiters();
        Ok(())
    }

    async fn receive_batch(
        &self,
        max_messages: i32,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Notification>, PipelineError> {
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let max_messages = max_messages.max(1) as usize;
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.published.notified();
            let (batch, next_visible) = self.take_visible(max_messages);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Vec::new()),
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), PipelineError> {
        let mut messages = self.messages.lock();
        let position = messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                PipelineError::QueueUnavailable(format!("Unknown receipt handle {receipt_handle}"))
            })?;
        messages.remove(position);
        Ok(())
    }
}
