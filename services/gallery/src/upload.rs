use crate::config::Config;
use crate::error::{GalleryError, Result};
use crate::object_store::{ObjectStore, StoredObject, UploadHandle, ViewHandle};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Settings for the upload coordinator
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub bucket: String,
    pub prefix: String,
    pub upload_ttl: Duration,
    pub view_ttl: Duration,
    pub max_listed: usize,
}

impl From<&Config> for UploadSettings {
    fn from(config: &Config) -> Self {
        Self {
            bucket: config.s3.bucket.clone(),
            prefix: config.s3.upload_prefix.clone(),
            upload_ttl: config.upload_url_expiry(),
            view_ttl: config.view_url_expiry(),
            max_listed: config.s3.list_max_keys,
        }
    }
}

/// An upload capability plus the location it writes to
#[derive(Debug, Clone)]
pub struct UploadGrant {
    pub handle: UploadHandle,
    pub bucket: String,
}

/// A listed object with its read capability, if one could be minted
#[derive(Debug, Clone)]
pub struct VisibleObject {
    pub object: StoredObject,
    pub view: Option<ViewHandle>,
}

/// Issues upload capabilities and lists the images currently stored
///
/// The coordinator knows nothing about moderation: an object is listed for
/// as long as it exists in the store.
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    settings: UploadSettings,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, settings: UploadSettings) -> Self {
        Self { store, settings }
    }

    /// Mint a write capability for a new image
    #[instrument(skip(self))]
    pub async fn request_upload_handle(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> Result<UploadGrant> {
        if file_name.is_empty() || content_type.is_empty() {
            return Err(GalleryError::InvalidArgument(
                "fileName and fileType are required".to_string(),
            ));
        }

        let key = self.upload_key(file_name);
        let handle = self
            .store
            .presign_upload(
                &self.settings.bucket,
                &key,
                content_type,
                self.settings.upload_ttl,
            )
            .await
            .map_err(into_unavailable)?;

        debug!(key = %handle.key, expires_at = %handle.expires_at, "Upload handle issued");
        metrics::counter!("gallery.uploads.handles_issued").increment(1);

        Ok(UploadGrant {
            handle,
            bucket: self.settings.bucket.clone(),
        })
    }

    /// List stored images with fresh view capabilities
    ///
    /// A failure to presign one object leaves that entry without a view
    /// handle; only a failed listing fails the call.
    #[instrument(skip(self))]
    pub async fn list_visible_objects(&self) -> Result<Vec<VisibleObject>> {
        let mut objects = self
            .store
            .list_objects(
                &self.settings.bucket,
                &self.settings.prefix,
                self.settings.max_listed,
            )
            .await
            .map_err(into_unavailable)?;
        objects.truncate(self.settings.max_listed);

        let views = join_all(objects.iter().map(|object| {
            self.store
                .presign_view(&self.settings.bucket, &object.key, self.settings.view_ttl)
        }))
        .await;

        let visible: Vec<VisibleObject> = objects
            .into_iter()
            .zip(views)
            .map(|(object, view)| {
                let view = view
                    .inspect_err(|e| {
                        warn!(key = %object.key, error = %e, "Failed to presign view URL");
                        metrics::counter!("gallery.listing.presign_failures").increment(1);
                    })
                    .ok();
                VisibleObject { object, view }
            })
            .collect();

        debug!(count = visible.len(), "Listed visible objects");
        Ok(visible)
    }

    /// `<prefix><millis><random>-<file name>`
    fn upload_key(&self, file_name: &str) -> String {
        let nonce = Uuid::new_v4().simple().to_string();
        format!(
            "{prefix}{millis}{nonce}-{file_name}",
            prefix = self.settings.prefix,
            millis = Utc::now().timestamp_millis(),
            nonce = &nonce[..8],
        )
    }
}

/// Collaborator failures reach callers as a generic unavailability
fn into_unavailable(err: GalleryError) -> GalleryError {
    match err {
        GalleryError::Unavailable(_) => err,
        other => GalleryError::Unavailable(other.to_string()),
    }
}
