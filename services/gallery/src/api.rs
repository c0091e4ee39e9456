use crate::config::ApiConfig;
use crate::error::GalleryError;
use crate::upload::{UploadCoordinator, VisibleObject};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<UploadCoordinator>,
}

/// Upload URL request body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    pub file_name: Option<String>,
    pub file_type: Option<String>,
}

/// Upload URL response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    /// Presigned PUT URL
    pub upload_url: String,
    /// Object key the upload will create
    pub key: String,
    pub bucket_name: String,
}

/// Image list response
#[derive(Debug, Serialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageEntry>,
}

/// Listed image with its view URL (null when presigning failed)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEntry {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: i64,
    pub url: Option<String>,
}

impl From<VisibleObject> for ImageEntry {
    fn from(v: VisibleObject) -> Self {
        Self {
            key: v.object.key,
            last_modified: v.object.last_modified,
            size: v.object.size,
            url: v.view.map(|view| view.url),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/upload-url", post(create_upload_url))
        .route("/images", get(list_images))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Without an allow-list, requests lacking an Origin header still get
    // permissive CORS headers
    let router = if config.cors_origins.is_empty() {
        router.layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
    } else {
        router
    };

    router
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gallery-service"
    }))
}

/// Issue a presigned upload URL
#[instrument(skip(state, body))]
async fn create_upload_url(
    State(state): State<AppState>,
    body: Result<Json<UploadUrlRequest>, JsonRejection>,
) -> Result<Json<UploadUrlResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        info!(error = %rejection, "Rejected upload URL request body");
        api_error(
            StatusCode::BAD_REQUEST,
            "fileName and fileType are required",
            "INVALID_ARGUMENT",
        )
    })?;

    let file_name = request.file_name.unwrap_or_default();
    let file_type = request.file_type.unwrap_or_default();

    let grant = state
        .coordinator
        .request_upload_handle(&file_name, &file_type)
        .await
        .map_err(|e| match e {
            GalleryError::InvalidArgument(message) => {
                api_error(StatusCode::BAD_REQUEST, &message, "INVALID_ARGUMENT")
            }
            other => {
                error!(error = %other, "Failed to generate presigned URL");
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to generate presigned URL",
                    "PRESIGN_ERROR",
                )
            }
        })?;

    Ok(Json(UploadUrlResponse {
        upload_url: grant.handle.url,
        key: grant.handle.key,
        bucket_name: grant.bucket,
    }))
}

/// List stored images with view URLs
#[instrument(skip(state))]
async fn list_images(
    State(state): State<AppState>,
) -> Result<Json<ImageListResponse>, ApiError> {
    let images = state
        .coordinator
        .list_visible_objects()
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to list images");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list images",
                "LIST_ERROR",
            )
        })?;

    Ok(Json(ImageListResponse {
        images: images.into_iter().map(ImageEntry::from).collect(),
    }))
}

/// Start the upload API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting upload API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
