use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the gallery service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Shared AWS settings
    #[serde(default)]
    pub aws: AwsConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// SQS notification queue configuration
    #[serde(default)]
    pub sqs: SqsConfig,
    /// Rekognition configuration
    #[serde(default)]
    pub rekognition: RekognitionConfig,
    /// Moderation policy configuration
    #[serde(default)]
    pub moderation: ModerationConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Settings shared by every AWS client
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket that receives uploads
    pub bucket: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix that namespaces uploaded images
    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,
    /// Upload URL expiration in seconds
    #[serde(default = "default_upload_url_expiry_secs")]
    pub upload_url_expiry_secs: u64,
    /// View URL expiration in seconds
    #[serde(default = "default_view_url_expiry_secs")]
    pub view_url_expiry_secs: u64,
    /// Hard ceiling on the number of listed images
    #[serde(default = "default_list_max_keys")]
    pub list_max_keys: usize,
}

/// SQS consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SqsConfig {
    /// Run the moderation queue consumer
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// URL of the queue receiving S3 object-created notifications
    pub queue_url: Option<String>,
    /// Custom endpoint URL (for LocalStack, ElasticMQ, etc.)
    pub endpoint_url: Option<String>,
    /// Maximum messages per receive call (1-10)
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,
    /// Long-poll wait in seconds (0-20)
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: i32,
    /// Visibility timeout override in seconds (queue default when unset)
    pub visibility_timeout_secs: Option<i32>,
}

/// Rekognition configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RekognitionConfig {
    /// Custom endpoint URL
    pub endpoint_url: Option<String>,
}

/// Moderation policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationConfig {
    /// Minimum confidence requested from the analysis service
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Findings strictly above this confidence cause deletion
    #[serde(default = "default_deletion_threshold")]
    pub deletion_threshold: f32,
    /// Notifications moderated concurrently within one batch
    #[serde(default = "default_moderation_concurrency")]
    pub concurrency: usize,
}

/// API configuration for the upload/listing endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Serve the HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "gallery-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "eu-west-1".to_string()
}

fn default_upload_prefix() -> String {
    "uploads/".to_string()
}

fn default_upload_url_expiry_secs() -> u64 {
    300
}

fn default_view_url_expiry_secs() -> u64 {
    3600
}

fn default_list_max_keys() -> usize {
    50
}

fn default_max_messages() -> i32 {
    10
}

fn default_wait_time_secs() -> i32 {
    20
}

fn default_min_confidence() -> f32 {
    50.0
}

fn default_deletion_threshold() -> f32 {
    80.0
}

fn default_moderation_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "gallery-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/gallery").required(false))
            .add_source(config::File::with_name("/etc/gallery/gallery").required(false))
            // GALLERY__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("GALLERY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins"),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
        }

        if self.sqs.enabled && self.sqs.queue_url.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::MissingRequired("sqs.queue_url".to_string()));
        }

        for (key, value) in [
            ("moderation.min_confidence", self.moderation.min_confidence),
            ("moderation.deletion_threshold", self.moderation.deletion_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{value} is outside 0-100"),
                });
            }
        }

        if self.moderation.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "moderation.concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.s3.view_url_expiry_secs <= self.s3.upload_url_expiry_secs {
            return Err(ConfigError::InvalidValue {
                key: "s3.view_url_expiry_secs".to_string(),
                message: "view URLs must outlive upload URLs".to_string(),
            });
        }

        Ok(())
    }

    /// Get upload URL expiry as Duration
    pub fn upload_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.upload_url_expiry_secs)
    }

    /// Get view URL expiry as Duration
    pub fn view_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.view_url_expiry_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
        }
    }
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            queue_url: None,
            endpoint_url: None,
            max_messages: default_max_messages(),
            wait_time_secs: default_wait_time_secs(),
            visibility_timeout_secs: None,
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            deletion_threshold: default_deletion_threshold(),
            concurrency: default_moderation_concurrency(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_api_host(),
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}
