//! Visual content inspection.
//!
//! The analyzer submits a stored object to an external vision service and
//! returns the moderation findings it reports. Deciding what to do with the
//! findings belongs to [`crate::moderation::RetentionPolicy`].

use crate::config::RekognitionConfig;
use crate::error::{GalleryError, Result};
use crate::object_store::ObjectRef;
use async_trait::async_trait;
use aws_sdk_rekognition::config::Builder as RekognitionConfigBuilder;
use aws_sdk_rekognition::types::{Image, S3Object};
use aws_sdk_rekognition::Client as RekognitionClient;
use aws_types::SdkConfig;
use tracing::{debug, info, instrument};

/// A single label reported by content analysis
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationFinding {
    /// Moderation label (e.g. "Explicit Nudity")
    pub label: String,
    /// Parent category in the label taxonomy, if any
    pub parent_label: Option<String>,
    /// Confidence in percent (0-100)
    pub confidence: f32,
}

impl ModerationFinding {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            parent_label: None,
            confidence,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    /// Inspect an object, reporting findings at or above `min_confidence`
    ///
    /// Any failure to read or analyse the object is [`GalleryError::Unavailable`];
    /// an object that cannot be inspected is never treated as clean.
    async fn analyze(
        &self,
        object: &ObjectRef,
        min_confidence: f32,
    ) -> Result<Vec<ModerationFinding>>;
}

/// Amazon Rekognition moderation-label analyzer
pub struct RekognitionAnalyzer {
    client: RekognitionClient,
}

impl RekognitionAnalyzer {
    pub fn new(sdk_config: &SdkConfig, config: &RekognitionConfig) -> Self {
        let mut builder = RekognitionConfigBuilder::from(sdk_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        info!(endpoint = ?config.endpoint_url, "Rekognition analyzer initialized");

        Self {
            client: RekognitionClient::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ContentAnalyzer for RekognitionAnalyzer {
    #[instrument(skip(self, object), fields(object = %object))]
    async fn analyze(
        &self,
        object: &ObjectRef,
        min_confidence: f32,
    ) -> Result<Vec<ModerationFinding>> {
        let image = Image::builder()
            .s3_object(
                S3Object::builder()
                    .bucket(&object.bucket)
                    .name(&object.key)
                    .build(),
            )
            .build();

        let response = self
            .client
            .detect_moderation_labels()
            .image(image)
            .min_confidence(min_confidence)
            .send()
            .await
            .map_err(|e| GalleryError::unavailable("Failed to detect moderation labels", e))?;

        let findings: Vec<ModerationFinding> = response
            .moderation_labels()
            .iter()
            .map(|label| ModerationFinding {
                label: label.name().unwrap_or_default().to_string(),
                parent_label: label
                    .parent_name()
                    .filter(|p| !p.is_empty())
                    .map(String::from),
                confidence: label.confidence().unwrap_or_default(),
            })
            .collect();

        debug!(count = findings.len(), "Moderation labels received");
        Ok(findings)
    }
}
