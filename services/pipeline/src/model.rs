//! Data model for stored images, tags and upload notifications.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of tags the store accepts on a single object
pub const MAX_TAGS: usize = 10;

/// A stored image and its tag set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageObject {
    /// Store key, unique within the bucket
    pub key: String,
    /// Content checksum as reported by the store
    pub e_tag: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// Size in bytes
    pub size: i64,
    #[serde(default)]
    pub tags: Vec<ImageTag>,
}

/// A classification label attached to an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTag {
    /// Label name
    #[serde(rename = "tag")]
    pub key: String,
    /// Stringified confidence score
    pub value: String,
}

impl ImageTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Confidence parsed back out of the tag value, if it is numeric
    pub fn confidence(&self) -> Option<f32> {
        self.value.parse().ok()
    }
}

impl From<&LabelResult> for ImageTag {
    fn from(label: &LabelResult) -> Self {
        Self {
            key: label.name.clone(),
            value: label.confidence.to_string(),
        }
    }
}

/// Upload request from a client, also the notification payload.
///
/// Wire shape is a flat JSON object: `{"name": "...", "contentType": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadIntent {
    /// Object name, used as the store key
    pub name: String,
    #[serde(default)]
    pub content_type: String,
}

impl UploadIntent {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
        }
    }

    /// Lowercased extension of the object name including the dot, e.g. `.jpg`
    pub fn extension(&self) -> Option<String> {
        let file_name = self.name.rsplit('/').next().unwrap_or(&self.name);
        match file_name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(file_name[idx..].to_ascii_lowercase()),
        }
    }
}

/// A message received from the notification queue
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub message_id: String,
    /// Raw message body, a serialized [`UploadIntent`]
    pub body: String,
    /// Opaque handle required to acknowledge this delivery
    pub receipt_handle: String,
    /// How many times the message has been delivered, including this one
    pub receive_count: u32,
}

impl Notification {
    /// Deserialize the body as an [`UploadIntent`]
    pub fn upload_intent(&self) -> Result<UploadIntent, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// A label returned by the classifier
#[derive(Debug, Clone, PartialEq)]
pub struct LabelResult {
    pub name: String,
    /// Confidence on a 0-100 scale
    pub confidence: f32,
}

impl LabelResult {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// Reference to an object the classifier can read directly from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bucket, self.key)
    }
}

/// Object body and content type returned by a read
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
}

/// Tags chosen for an object and the labels that did not fit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagSelection {
    pub tags: Vec<ImageTag>,
    pub skipped: Vec<LabelResult>,
}

/// Turn classifier output into a tag set.
///
/// The first `cap` labels are kept in the order the classifier returned
/// them. Anything after that is reported back as skipped.
pub fn build_tag_set(labels: &[LabelResult], cap: usize) -> TagSelection {
    let split = labels.len().min(cap);
    let (kept, dropped) = labels.split_at(split);

    TagSelection {
        tags: kept.iter().map(ImageTag::from).collect(),
        skipped: dropped.to_vec(),
    }
}

/// Order tags by confidence, highest first. Non-numeric values sort last.
pub fn sort_tags_by_confidence(tags: &mut [ImageTag]) {
    tags.sort_by(|a, b| match (a.confidence(), b.confidence()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => b.value.cmp(&a.value),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_intent_wire_shape() {
        let intent = UploadIntent::new("cat.jpg", "image/jpeg");
        let json = serde_json::to_string(&intent).unwrap();
        assert_eq!(json, r#"{"name":"cat.jpg","contentType":"image/jpeg"}"#);

        let parsed: UploadIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, intent);
    }

    #[test]
    fn test_upload_intent_without_content_type() {
        let parsed: UploadIntent = serde_json::from_str(r#"{"name":"report.pdf"}"#).unwrap();
        assert_eq!(parsed.name, "report.pdf");
        assert!(parsed.content_type.is_empty());
    }

    #[test]
    fn test_extension() {
        assert_eq!(UploadIntent::new("cat.JPG", "").extension().as_deref(), Some(".jpg"));
        assert_eq!(
            UploadIntent::new("a.b/photo.png", "").extension().as_deref(),
            Some(".png")
        );
        assert_eq!(UploadIntent::new("README", "").extension(), None);
        assert_eq!(UploadIntent::new(".hidden", "").extension(), None);
    }

    #[test]
    fn test_tag_cap_keeps_first_ten_in_classifier_order() {
        let labels: Vec<LabelResult> = (0..15)
            .map(|i| LabelResult::new(format!("label-{i}"), 99.0 - i as f32))
            .collect();

        let selection = build_tag_set(&labels, MAX_TAGS);

        assert_eq!(selection.tags.len(), 10);
        assert_eq!(selection.skipped.len(), 5);
        assert_eq!(selection.tags[0].key, "label-0");
        assert_eq!(selection.tags[9].key, "label-9");
        assert_eq!(selection.skipped[0].name, "label-10");
    }

    #[test]
    fn test_tag_value_is_stringified_confidence() {
        let tag = ImageTag::from(&LabelResult::new("Cat", 98.2));
        assert_eq!(tag.key, "Cat");
        assert_eq!(tag.value, "98.2");
        assert_eq!(tag.confidence(), Some(98.2));
    }

    #[test]
    fn test_image_object_json_field_names() {
        let object = ImageObject {
            key: "cat.jpg".into(),
            e_tag: "\"abc\"".into(),
            last_modified: None,
            size: 42,
            tags: vec![ImageTag::new("Cat", "98.2")],
        };

        let value = serde_json::to_value(&object).unwrap();
        assert_eq!(value["eTag"], "\"abc\"");
        assert_eq!(value["tags"][0]["tag"], "Cat");
        assert_eq!(value["tags"][0]["value"], "98.2");
    }

    #[test]
    fn test_sort_tags_by_confidence() {
        let mut tags = vec![
            ImageTag::new("Animal", "95"),
            ImageTag::new("Weird", "n/a"),
            ImageTag::new("Cat", "98.2"),
            ImageTag::new("Pet", "100"),
        ];
        sort_tags_by_confidence(&mut tags);

        let keys: Vec<_> = tags.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["Pet", "Cat", "Animal", "Weird"]);
    }
}
