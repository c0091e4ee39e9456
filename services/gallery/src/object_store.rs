use crate::config::S3Config;
use crate::error::{GalleryError, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// A bucket/key pair naming one stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Metadata of an object as reported by a listing
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

/// Time-limited capability to write one object
#[derive(Debug, Clone, PartialEq)]
pub struct UploadHandle {
    pub url: String,
    pub key: String,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
}

/// Time-limited capability to read one object
#[derive(Debug, Clone, PartialEq)]
pub struct ViewHandle {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Object storage operations the gallery depends on
///
/// Implementations must treat deleting a missing key as success so that
/// redelivered notifications can be processed again safely.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Mint a presigned PUT for `key`, bound to `content_type`
    async fn presign_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<UploadHandle>;

    /// Mint a presigned GET for `key`
    async fn presign_view(&self, bucket: &str, key: &str, ttl: Duration) -> Result<ViewHandle>;

    /// List at most `max_keys` objects under `prefix`, in store order
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> Result<Vec<StoredObject>>;

    /// Delete an object; missing keys are not an error
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create an S3 store from the process-wide AWS configuration
    pub fn new(sdk_config: &SdkConfig, config: &S3Config) -> Self {
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
            endpoint = ?config.endpoint_url,
            "S3 object store initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, ttl))]
    async fn presign_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<UploadHandle> {
        let presigned = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config(ttl)?)
            .await
            .map_err(|e| GalleryError::unavailable("Failed to presign upload", e))?;

        Ok(UploadHandle {
            url: presigned.uri().to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            expires_at: expiry_from_now(ttl),
        })
    }

    #[instrument(skip(self, ttl))]
    async fn presign_view(&self, bucket: &str, key: &str, ttl: Duration) -> Result<ViewHandle> {
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config(ttl)?)
            .await
            .map_err(|e| GalleryError::unavailable("Failed to presign view", e))?;

        Ok(ViewHandle {
            url: presigned.uri().to_string(),
            expires_at: expiry_from_now(ttl),
        })
    }

    #[instrument(skip(self))]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> Result<Vec<StoredObject>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(i32::try_from(max_keys).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(|e| GalleryError::unavailable("Failed to list objects", e))?;

        let objects: Vec<StoredObject> = response
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                Some(StoredObject {
                    key,
                    size: obj.size().unwrap_or_default(),
                    last_modified: obj
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                    content_type: None,
                })
            })
            .collect();

        debug!(count = objects.len(), "Listed objects");
        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        match self
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {
                debug!("Object deleted");
                Ok(())
            }
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                if is_missing_key(e.code(), status) {
                    debug!("Object already absent");
                    Ok(())
                } else {
                    Err(GalleryError::unavailable("Failed to delete object", e))
                }
            }
        }
    }
}

/// S3 answers 204 for missing keys, but S3-compatible stores may report them
fn is_missing_key(code: Option<&str>, status: Option<u16>) -> bool {
    matches!(code, Some("NoSuchKey" | "NotFound")) || status == Some(404)
}

fn presigning_config(ttl: Duration) -> Result<PresigningConfig> {
    PresigningConfig::expires_in(ttl)
        .map_err(|e| GalleryError::InvalidArgument(format!("Invalid presign expiry: {e}")))
}

/// Wall-clock instant `ttl` from now
pub(crate) fn expiry_from_now(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + ttl
}
