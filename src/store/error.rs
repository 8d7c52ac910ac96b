use thiserror::Error;

/// Errors surfaced by an [`ObjectStore`](super::ObjectStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("{operation} request failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("response body interrupted: {0}")]
    Body(String),
}

impl StoreError {
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            operation,
            message: message.into(),
        }
    }
}
