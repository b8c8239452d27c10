use crate::config::ApiConfig;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use imageviewer_pipeline::store::list_objects_with_tags;
use imageviewer_pipeline::{
    ImageObject, NotificationQueue, ObjectStore, PipelineError, UploadCoordinator, UploadIntent,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub coordinator: Arc<UploadCoordinator>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn NotificationQueue>,
        presigned_url_expiry: Duration,
    ) -> Self {
        let coordinator = UploadCoordinator::new(store.clone(), queue, presigned_url_expiry);
        Self {
            store,
            coordinator: Arc::new(coordinator),
        }
    }
}

/// Presigned upload URL response
#[derive(Debug, Serialize)]
pub struct UploadUrlResponse {
    pub url: String,
}

/// Errors surfaced by the HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Store failure on a proxied request, reported with the store's status
    #[error(transparent)]
    Store(PipelineError),

    /// Failure while starting or ending an upload
    #[error("{0}")]
    Upload(PipelineError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::counter!("storage.api.errors", "status" => status.as_u16().to_string())
            .increment(1);
        (status, self.to_string()).into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
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
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/s3proxy", get(list_objects))
        .route("/s3proxy/startUpload", post(start_upload))
        .route("/s3proxy/endUpload", post(end_upload))
        .route(
            "/s3proxy/:key",
            get(get_object).put(put_object).delete(delete_object),
        )
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// List objects with their tags
#[instrument(skip(state))]
async fn list_objects(State(state): State<AppState>) -> Result<Json<Vec<ImageObject>>, ApiError> {
    let objects = list_objects_with_tags(state.store.as_ref())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to list objects");
            ApiError::from(e)
        })?;

    Ok(Json(objects))
}

/// Stream an object with its stored content type
#[instrument(skip(state))]
async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let object = state.store.get_object(&key).await.map_err(|e| {
        error!(error = %e, key = %key, "Failed to get object");
        ApiError::from(e)
    })?;

    let mut response = object.body.into_response();
    if let Some(value) = object
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

/// Write an object directly
#[instrument(skip(state, headers, body), fields(size = body.len()))]
async fn put_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    state
        .store
        .put_object(&key, body, content_type)
        .await
        .map_err(|e| {
            error!(error = %e, key = %key, "Failed to put object");
            ApiError::from(e)
        })?;

    Ok(StatusCode::OK)
}

/// Delete an object
#[instrument(skip(state))]
async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_object(&key).await.map_err(|e| {
        error!(error = %e, key = %key, "Failed to delete object");
        ApiError::from(e)
    })?;

    Ok(StatusCode::OK)
}

/// Issue a presigned upload URL
#[instrument(skip(state))]
async fn start_upload(
    State(state): State<AppState>,
    Json(intent): Json<UploadIntent>,
) -> Result<Json<UploadUrlResponse>, ApiError> {
    let upload = state
        .coordinator
        .issue_upload_url(&intent)
        .await
        .map_err(|e| {
            error!(error = %e, name = %intent.name, "Failed to generate upload URL");
            ApiError::Upload(e)
        })?;

    metrics::counter!("storage.uploads.started").increment(1);
    Ok(Json(UploadUrlResponse { url: upload.url }))
}

/// Confirm an upload and queue it for labeling
#[instrument(skip(state))]
async fn end_upload(
    State(state): State<AppState>,
    Json(intent): Json<UploadIntent>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.confirm_upload(&intent).await.map_err(|e| {
        error!(error = %e, name = %intent.name, "Failed to publish upload notification");
        ApiError::Upload(e)
    })?;

    metrics::counter!("storage.uploads.completed").increment(1);
    Ok(StatusCode::OK)
}

/// Start the API server and serve until `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting storage API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    info!("Storage API server stopped");

    Ok(())
}

/// Serve until `signal` resolves, then shut down gracefully.
///
/// Returns an error if the server stops first, e.g. when the address cannot be bound.
pub async fn serve_until_signal<F>(state: AppState, config: ApiConfig, signal: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let shutdown = CancellationToken::new();
    let mut server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { start_api_server(state, &config, shutdown).await }
    });

    tokio::select! {
        _ = signal => {
            info!("Shutting down storage API");
            shutdown.cancel();
            server.await.context("API server task failed")?
        }
        result = &mut server => {
            result.context("API server task failed")??;
            anyhow::bail!("API server stopped before shutdown was requested")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_keep_store_status() {
        let forbidden = ApiError::from(PipelineError::StoreUnavailable {
            status: Some(403),
            message: "Access Denied".to_string(),
        });
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let missing = ApiError::from(PipelineError::ObjectNotFound("cat.jpg".to_string()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_upload_errors_are_bad_requests() {
        let err = ApiError::Upload(PipelineError::QueueUnavailable("throttled".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("throttled"));
    }
}
