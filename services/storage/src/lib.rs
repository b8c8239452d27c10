//! ImageViewer Storage API
//!
//! HTTP facade in front of the image bucket. Objects are listed, read,
//! written and deleted through a thin proxy, and browser uploads go
//! straight to the bucket through presigned URLs. Confirming an upload
//! publishes the notification the labeling worker consumes.
//!
//! ## Routes
//!
//! ```text
//! GET    /s3proxy              objects with their label tags
//! GET    /s3proxy/:key         object bytes
//! PUT    /s3proxy/:key         direct write
//! DELETE /s3proxy/:key         delete
//! POST   /s3proxy/startUpload  presigned upload URL
//! POST   /s3proxy/endUpload    queue the upload for labeling
//! GET    /healthcheck          liveness
//! ```

pub mod api;
pub mod config;

pub use api::{
    create_router, serve_until_signal, start_api_server, ApiError, AppState, UploadUrlResponse,
};
pub use config::{ApiConfig, Config, ServiceConfig};
