//! Error taxonomy shared by the gateway, queue, classifier and worker.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the labeling pipeline and its collaborators
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Object store unavailable: {message}")]
    StoreUnavailable {
        /// HTTP status reported by the store, when there was a response
        status: Option<u16>,
        message: String,
    },

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Notification queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("Invalid object reference: {0}")]
    InvalidObjectReference(String),

    #[error("Malformed notification payload: {0}")]
    MalformedPayload(String),
}

impl PipelineError {
    /// Shorthand for a store failure without a response status
    pub fn store(message: impl Into<String>) -> Self {
        PipelineError::StoreUnavailable {
            status: None,
            message: message.into(),
        }
    }

    /// Whether a later attempt at the same work can succeed.
    ///
    /// Transport failures are transient. A bad payload or a missing object
    /// will fail the same way on every redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::StoreUnavailable { .. }
                | PipelineError::QueueUnavailable(_)
                | PipelineError::ClassifierUnavailable(_)
        )
    }

    /// HTTP status to report on the synchronous proxy path
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::StoreUnavailable {
                status: Some(status),
                ..
            } => *status,
            PipelineError::StoreUnavailable { status: None, .. } => 502,
            PipelineError::ObjectNotFound(_) => 404,
            PipelineError::InvalidObjectReference(_) | PipelineError::MalformedPayload(_) => 400,
            PipelineError::QueueUnavailable(_) | PipelineError::ClassifierUnavailable(_) => 503,
            PipelineError::Configuration(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PipelineError::ClassifierUnavailable("timeout".into()).is_retryable());
        assert!(PipelineError::store("connection reset").is_retryable());
        assert!(PipelineError::QueueUnavailable("throttled".into()).is_retryable());

        assert!(!PipelineError::MalformedPayload("eof".into()).is_retryable());
        assert!(!PipelineError::ObjectNotFound("cat.jpg".into()).is_retryable());
        assert!(!PipelineError::InvalidObjectReference("cat.jpg".into()).is_retryable());
    }

    #[test]
    fn test_store_status_is_passed_through() {
        let err = PipelineError::StoreUnavailable {
            status: Some(403),
            message: "Access Denied".into(),
        };
        assert_eq!(err.status_code(), 403);
        assert_eq!(PipelineError::ObjectNotFound("x".into()).status_code(), 404);
        assert_eq!(PipelineError::store("dns").status_code(), 502);
    }
}
