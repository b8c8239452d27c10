use async_trait::async_trait;
use imageviewer_pipeline::{
    Classifier, CycleReport, ImageTag, InMemoryObjectStore, InMemoryQueue, LabelResult,
    LabelingWorker, NotificationQueue, ObjectRef, ObjectStore, PipelineError, UploadCoordinator,
    UploadIntent, WorkerSettings,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Classifier returning canned labels per object key
#[derive(Default)]
struct FixedClassifier {
    labels: HashMap<String, Vec<LabelResult>>,
    calls: Mutex<Vec<(ObjectRef, f32)>>,
}

impl FixedClassifier {
    fn with(mut self, key: &str, labels: Vec<LabelResult>) -> Self {
        self.labels.insert(key.to_string(), labels);
        self
    }

    fn calls(&self) -> Vec<(ObjectRef, f32)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn detect_labels(
        &self,
        object: &ObjectRef,
        min_confidence: f32,
    ) -> Result<Vec<LabelResult>, PipelineError> {
        self.calls.lock().push((object.clone(), min_confidence));
        Ok(self
            .labels
            .get(&object.key)
            .map(|labels| {
                labels
                    .iter()
                    .filter(|l| l.confidence >= min_confidence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

struct Harness {
    store: Arc<InMemoryObjectStore>,
    queue: Arc<InMemoryQueue>,
    classifier: Arc<FixedClassifier>,
    coordinator: UploadCoordinator,
    worker: LabelingWorker,
}

fn harness(classifier: FixedClassifier) -> Harness {
    let store = Arc::new(InMemoryObjectStore::new("images"));
    let queue = Arc::new(InMemoryQueue::new(Duration::ZERO));
    let classifier = Arc::new(classifier);

    let coordinator = UploadCoordinator::new(
        store.clone(),
        queue.clone(),
        Duration::from_secs(24 * 60 * 60),
    );

    let settings = WorkerSettings {
        poll_interval: Duration::from_millis(10),
        wait_time: Duration::ZERO,
        ..WorkerSettings::default()
    };
    let worker = LabelingWorker::new(queue.clone(), store.clone(), classifier.clone(), settings);

    Harness {
        store,
        queue,
        classifier,
        coordinator,
        worker,
    }
}

#[tokio::test]
async fn upload_then_confirm_tags_the_object() {
    let h = harness(FixedClassifier::default().with(
        "cat.jpg",
        vec![
            LabelResult::new("Cat", 98.2),
            LabelResult::new("Animal", 95.0),
            LabelResult::new("Blanket", 41.0),
        ],
    ));

    let intent = UploadIntent::new("cat.jpg", "image/jpeg");
    let upload = h.coordinator.issue_upload_url(&intent).await.unwrap();
    assert!(upload.url.contains("cat.jpg"));

    // Client PUTs the bytes through the presigned URL
    h.store.insert("cat.jpg", vec![0xFFu8, 0xD8, 0xFF]);
    h.coordinator.confirm_upload(&intent).await.unwrap();

    let report = h.worker.poll_once(&CancellationToken::new()).await;

    assert_eq!(
        report,
        CycleReport {
            received: 1,
            acknowledged: 1,
            ..CycleReport::default()
        }
    );
    assert_eq!(
        h.store.get_tags("cat.jpg").await.unwrap(),
        vec![ImageTag::new("Cat", "98.2"), ImageTag::new("Animal", "95")]
    );
    assert!(h.queue.is_empty());

    let calls = h.classifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0.bucket, "images");
    assert_eq!(calls[0].1, 70.0);
}

#[tokio::test]
async fn confirm_without_upload_is_left_for_redelivery() {
    let h = harness(FixedClassifier::default().with("ghost.png", vec![LabelResult::new("Cat", 99.0)]));

    h.coordinator
        .confirm_upload(&UploadIntent::new("ghost.png", "image/png"))
        .await
        .unwrap();

    let report = h.worker.poll_once(&CancellationToken::new()).await;
    assert_eq!(report.received, 1);
    assert_eq!(report.left_for_redelivery, 1);
    assert_eq!(h.queue.len(), 1);

    // Upload lands late; the redelivered notification completes
    h.store.insert("ghost.png", vec![0x89u8, 0x50]);
    let report = h.worker.poll_once(&CancellationToken::new()).await;
    assert_eq!(report.acknowledged, 1);
    assert_eq!(
        h.store.tags("ghost.png").unwrap(),
        vec![ImageTag::new("Cat", "99")]
    );
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn worker_drains_several_uploads_until_shutdown() {
    let h = harness(
        FixedClassifier::default()
            .with("a.png", vec![LabelResult::new("Tree", 88.0)])
            .with("b.jpeg", vec![LabelResult::new("Car", 91.5)]),
    );

    for (name, content_type) in [("a.png", "image/png"), ("b.jpeg", "image/jpeg")] {
        h.store.insert(name, vec![1u8, 2, 3]);
        h.coordinator
            .confirm_upload(&UploadIntent::new(name, content_type))
            .await
            .unwrap();
    }

    let shutdown = CancellationToken::new();
    let worker = Arc::new(h.worker);
    let handle = tokio::spawn({
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !h.queue.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker should stop after shutdown")
        .unwrap();

    assert!(h.queue.is_empty());
    assert_eq!(h.store.tags("a.png").unwrap(), vec![ImageTag::new("Tree", "88")]);
    assert_eq!(h.store.tags("b.jpeg").unwrap(), vec![ImageTag::new("Car", "91.5")]);
}

#[tokio::test]
async fn malformed_notification_does_not_block_the_batch() {
    let h = harness(FixedClassifier::default().with("dog.jpg", vec![LabelResult::new("Dog", 97.0)]));

    h.queue.publish("not json").await.unwrap();
    h.store.insert("dog.jpg", vec![1u8]);
    h.coordinator
        .confirm_upload(&UploadIntent::new("dog.jpg", "image/jpeg"))
        .await
        .unwrap();

    let report = h.worker.poll_once(&CancellationToken::new()).await;

    assert_eq!(report.received, 2);
    assert_eq!(report.acknowledged, 1);
    assert_eq!(report.left_for_redelivery, 1);
    assert_eq!(h.queue.bodies(), vec!["not json".to_string()]);
    assert_eq!(h.store.tags("dog.jpg").unwrap(), vec![ImageTag::new("Dog", "97")]);
}
