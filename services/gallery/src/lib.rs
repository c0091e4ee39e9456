//! Gallery Service
//!
//! Image upload service with asynchronous content moderation. Clients upload
//! directly to S3 through presigned URLs; S3 object-created notifications flow
//! through SQS to a moderation worker, which asks Rekognition for moderation
//! labels and deletes images flagged with high confidence.
//!
//! ## Features
//!
//! - **Presigned Uploads**: short-lived PUT URLs bound to a content type, keyed
//!   under a fixed prefix with a time-based token
//! - **Image Listing**: capped listing of stored images with per-image view
//!   URLs; one failed presign never fails the listing
//! - **Moderation Worker**: batch-at-a-time processing with coarse failure
//!   semantics, relying on queue redelivery and idempotent deletes
//!
//! ## Architecture
//!
//! ```text
//!  Browser                        S3 Bucket                  SQS Queue
//! ┌──────────────┐  presigned   ┌──────────────┐  created   ┌──────────────┐
//! │ Upload       │─────PUT─────▶│ uploads/     │──event────▶│ Notifications│
//! └──────────────┘              └──────────────┘            └──────────────┘
//!        │                          ▲      ▲                        │
//!        ▼                          │      │ delete                 ▼
//! ┌──────────────┐   presign/list   │      │                 ┌──────────────┐
//! │ Upload       │──────────────────┘      └─────────────────│ Moderation   │
//! │ Coordinator  │                                           │ Worker       │
//! └──────────────┘                                           └──────────────┘
//!                                                                   │
//!                                                                   ▼
//!                                                            ┌──────────────┐
//!                                                            │ Rekognition  │
//!                                                            └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod content_analysis;
pub mod error;
pub mod moderation;
pub mod notification;
pub mod object_store;
pub mod queue;
pub mod upload;

#[cfg(test)]
mod testing;

pub use api::{AppState, ImageEntry, UploadUrlResponse};
pub use config::Config;
pub use content_analysis::{ContentAnalyzer, ModerationFinding, RekognitionAnalyzer};
pub use error::GalleryError;
pub use moderation::{BatchReport, ModerationOutcome, ModerationWorker, RetentionPolicy};
pub use notification::{decode_notification, decode_object_key};
pub use object_store::{ObjectRef, ObjectStore, S3ObjectStore, StoredObject, UploadHandle, ViewHandle};
pub use queue::{EventQueue, PollOutcome, QueueConsumer, QueueMessage, SqsEventQueue};
pub use upload::{UploadCoordinator, UploadGrant, UploadSettings, VisibleObject};
