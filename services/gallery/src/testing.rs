//! In-memory collaborators for exercising the full upload → moderation cycle.

use crate::error::Result;
use crate::object_store::{expiry_from_now, ObjectStore, StoredObject, UploadHandle, ViewHandle};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Object store that keeps metadata in a map keyed by (bucket, key)
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
}

impl InMemoryObjectStore {
    /// Simulate a client completing an upload
    pub fn put(&self, bucket: &str, key: &str, size: i64) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                key: key.to_string(),
                size,
                last_modified: Some(Utc::now()),
                content_type: None,
            },
        );
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn presign_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<UploadHandle> {
        Ok(UploadHandle {
            url: format!("memory://{bucket}/{key}?op=put"),
            key: key.to_string(),
            content_type: content_type.to_string(),
            expires_at: expiry_from_now(ttl),
        })
    }

    async fn presign_view(&self, bucket: &str, key: &str, ttl: Duration) -> Result<ViewHandle> {
        Ok(ViewHandle {
            url: format!("memory://{bucket}/{key}?op=get"),
            expires_at: expiry_from_now(ttl),
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> Result<Vec<StoredObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|(_, object)| object.clone())
            .take(max_keys)
            .collect())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModerationConfig;
    use crate::content_analysis::{MockContentAnalyzer, ModerationFinding};
    use crate::error::GalleryError;
    use crate::moderation::ModerationWorker;
    use crate::queue::QueueMessage;
    use crate::upload::{UploadCoordinator, UploadSettings};
    use std::sync::Arc;

    const BUCKET: &str = "gallery-images";

    fn settings() -> UploadSettings {
        UploadSettings {
            bucket: BUCKET.to_string(),
            prefix: "uploads/".to_string(),
            upload_ttl: Duration::from_secs(300),
            view_ttl: Duration::from_secs(3600),
            max_listed: 50,
        }
    }

    /// Build the queue message S3 would emit for `key`
    fn created_event(id: &str, key: &str) -> QueueMessage {
        let encoded = urlencoding::encode(key).replace("%20", "+").replace("%2F", "/");
        QueueMessage {
            message_id: id.to_string(),
            receipt_handle: format!("receipt-{id}"),
            body: serde_json::json!({
                "Records": [{
                    "eventName": "ObjectCreated:Put",
                    "s3": { "bucket": { "name": BUCKET }, "object": { "key": encoded, "size": 10 } }
                }]
            })
            .to_string(),
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryObjectStore::default();
        store.put(BUCKET, "uploads/a.png", 1);

        assert!(store.delete_object(BUCKET, "uploads/a.png").await.is_ok());
        assert!(store.delete_object(BUCKET, "uploads/a.png").await.is_ok());
        assert!(store.delete_object(BUCKET, "uploads/never.png").await.is_ok());
    }

    #[tokio::test]
    async fn test_flagged_upload_disappears_from_listing() {
        let store = Arc::new(InMemoryObjectStore::default());
        let coordinator = UploadCoordinator::new(store.clone(), settings());

        let flagged = coordinator
            .request_upload_handle("party photo.png", "image/png")
            .await
            .unwrap();
        let clean = coordinator
            .request_upload_handle("cat.png", "image/png")
            .await
            .unwrap();

        store.put(BUCKET, &flagged.handle.key, 2048);
        store.put(BUCKET, &clean.handle.key, 1024);

        // Unmoderated objects are listed immediately
        assert_eq!(coordinator.list_visible_objects().await.unwrap().len(), 2);

        let mut analyzer = MockContentAnalyzer::new();
        analyzer.expect_analyze().returning(|object, _| {
            if object.key.ends_with("party photo.png") {
                Ok(vec![ModerationFinding::new("Explicit Nudity", 97.2)])
            } else {
                Ok(vec![])
            }
        });
        let worker = ModerationWorker::new(
            store.clone(),
            Arc::new(analyzer),
            &ModerationConfig::default(),
        );

        let batch = [
            created_event("m1", &flagged.handle.key),
            created_event("m2", &clean.handle.key),
        ];
        let report = worker.process_batch(&batch).await.unwrap();
        assert_eq!((report.deleted, report.retained), (1, 1));

        let listed = coordinator.list_visible_objects().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].object.key, clean.handle.key);
        assert!(listed[0].view.is_some());
        assert!(!store.contains(BUCKET, &flagged.handle.key));

        // Redelivery of the same batch is harmless
        let report = worker.process_batch(&batch).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(coordinator.list_visible_objects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_upload_stays_pending_moderation() {
        let store = Arc::new(InMemoryObjectStore::default());
        store.put(BUCKET, "uploads/1-nsfw.png", 4096);

        // The object exists but the vision service cannot read it
        let mut analyzer = MockContentAnalyzer::new();
        analyzer.expect_analyze().returning(|_, _| {
            Err(GalleryError::Unavailable(
                "Failed to detect moderation labels: unable to get object metadata from S3"
                    .to_string(),
            ))
        });
        let worker = ModerationWorker::new(
            store.clone(),
            Arc::new(analyzer),
            &ModerationConfig::default(),
        );

        let result = worker
            .process_batch(&[created_event("m1", "uploads/1-nsfw.png")])
            .await;

        assert!(result.is_err());
        assert!(store.contains(BUCKET, "uploads/1-nsfw.png"));
    }
}
