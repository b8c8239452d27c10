//! Object store gateway.
//!
//! The worker only needs to replace an object's tag set. The HTTP facade
//! uses the rest of the contract as a thin pass-through.

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Tag, Tagging};
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::{AwsConfig, ConfigError};
use crate::error::PipelineError;
use crate::model::{sort_tags_by_confidence, ImageObject, ImageTag, StoredObject};

/// Contract the pipeline needs from the object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket (namespace) the store operates on
    fn bucket(&self) -> &str;

    /// Replace every tag on `key` with `tags`
    async fn put_tags(&self, key: &str, tags: &[ImageTag]) -> Result<(), PipelineError>;

    async fn get_tags(&self, key: &str) -> Result<Vec<ImageTag>, PipelineError>;

    async fn get_object(&self, key: &str) -> Result<StoredObject, PipelineError>;

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> Result<(), PipelineError>;

    async fn delete_object(&self, key: &str) -> Result<(), PipelineError>;

    /// List every object in the bucket. Tags are not populated.
    async fn list_objects(&self) -> Result<Vec<ImageObject>, PipelineError>;

    /// Issue a URL that allows a single PUT of `key` with `content_type`
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, PipelineError>;
}

/// Tag lookups issued concurrently while listing
const TAG_FETCH_CONCURRENCY: usize = 8;

/// List objects and fetch each object's tags, highest confidence first
pub async fn list_objects_with_tags(
    store: &dyn ObjectStore,
) -> Result<Vec<ImageObject>, PipelineError> {
    let objects = store.list_objects().await?;

    stream::iter(objects)
        .map(|mut object| async move {
            let mut tags = store.get_tags(&object.key).await?;
            sort_tags_by_confidence(&mut tags);
            object.tags = tags;
            Ok::<_, PipelineError>(object)
        })
        .buffered(TAG_FETCH_CONCURRENCY)
        .try_collect()
        .await
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub fn new(sdk_config: &SdkConfig, config: &AwsConfig) -> Result<Self, PipelineError> {
        if config.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("aws.bucket".to_string()).into());
        }

        let mut s3_config_builder = S3ConfigBuilder::from(sdk_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, tags), fields(bucket = %self.bucket, tag_count = tags.len()))]
    async fn put_tags(&self, key: &str, tags: &[ImageTag]) -> Result<(), PipelineError> {
        let tag_set = tags
            .iter()
            .map(|t| Tag::builder().key(&t.key).value(&t.value).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::store(format!("Invalid tag: {e}")))?;

        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| PipelineError::store(format!("Invalid tag set: {e}")))?;

        self.client
            .put_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        debug!(key = %key, "Object tags replaced");
        Ok(())
    }

    async fn get_tags(&self, key: &str) -> Result<Vec<ImageTag>, PipelineError> {
        let response = self
            .client
            .get_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        Ok(response
            .tag_set()
            .iter()
            .map(|t| ImageTag::new(t.key(), t.value()))
            .collect())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_object(&self, key: &str) -> Result<StoredObject, PipelineError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let content_type = response.content_type().map(String::from);
        let body = response
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::store(format!("Failed to read object body: {e}")))?
            .into_bytes();

        Ok(StoredObject { body, content_type })
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> Result<(), PipelineError> {
        let response = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        info!(
            key = %key,
            e_tag = response.e_tag().unwrap_or_default(),
            "Uploaded object"
        );
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete_object(&self, key: &str) -> Result<(), PipelineError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        info!(key = %key, "Deleted object");
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<ImageObject>, PipelineError> {
        let mut objects = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| map_sdk_error(e, &self.bucket))?;

            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                objects.push(ImageObject {
                    key: key.to_string(),
                    e_tag: obj.e_tag().unwrap_or_default().to_string(),
                    last_modified: obj
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                    size: obj.size().unwrap_or_default(),
                    tags: Vec::new(),
                });
            }
        }

        Ok(objects)
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, PipelineError> {
        let presigning_config =
            PresigningConfig::expires_in(expires_in).map_err(|e| ConfigError::InvalidValue {
                key: "aws.presigned_url_expiry_secs".to_string(),
                message: e.to_string(),
            })?;

        let mut request = self.client.put_object().bucket(&self.bucket).key(key);
        if !content_type.is_empty() {
            request = request.content_type(content_type);
        }

        let presigned = request
            .presigned(presigning_config)
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        Ok(presigned.uri().to_string())
    }
}

/// Map an S3 SDK error, keeping the HTTP status the store answered with
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, key: &str) -> PipelineError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    match status {
        Some(404) => PipelineError::ObjectNotFound(key.to_string()),
        _ => PipelineError::StoreUnavailable {
            status,
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryObjectStore;

    #[tokio::test]
    async fn test_list_objects_with_tags_sorts_by_confidence() {
        let store = InMemoryObjectStore::new("images");
        store.insert("cat.jpg", vec![0u8; 4]);
        store.insert("dog.png", vec![0u8; 8]);
        store
            .put_tags(
                "cat.jpg",
                &[ImageTag::new("Animal", "95"), ImageTag::new("Cat", "98.2")],
            )
            .await
            .unwrap();

        let objects = list_objects_with_tags(&store).await.unwrap();

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "cat.jpg");
        assert_eq!(
            objects[0].tags,
            vec![ImageTag::new("Cat", "98.2"), ImageTag::new("Animal", "95")]
        );
        assert_eq!(objects[1].size, 8);
        assert!(objects[1].tags.is_empty());
    }
}
