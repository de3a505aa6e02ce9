use serde::{Serialize, Serializer};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause carried by [`Error::Inference`].
pub type InferenceCause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No image provided")]
    EmptyUpload,

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Upload too large: {size} bytes (limit {limit})")]
    UploadTooLarge { size: usize, limit: usize },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference failed: {message}")]
    Inference {
        message: String,
        #[source]
        source: InferenceCause,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("query: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("offline: {0}")]
    Offline(String),
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Error::StorageUnavailable(StorageError::Pool(err))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StorageUnavailable(StorageError::Query(err))
    }
}

impl Error {
    pub fn inference(message: impl Into<String>, source: impl Into<InferenceCause>) -> Self {
        Error::Inference {
            message: message.into(),
            source: source.into(),
        }
    }

    /// HTTP-equivalent status for the transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::EmptyUpload | Error::UnsupportedFormat(_) | Error::InvalidInput(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::UploadTooLarge { .. } => 413,
            Error::ModelUnavailable(_) | Error::StorageUnavailable(_) => 503,
            Error::Inference { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::Config(_)
            | Error::Join(_) => 500,
        }
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_input_maps_to_4xx() {
        assert_eq!(Error::EmptyUpload.status_code(), 400);
        assert_eq!(Error::UnsupportedFormat("exe".into()).status_code(), 400);
        assert_eq!(
            Error::UploadTooLarge { size: 20, limit: 10 }.status_code(),
            413
        );
    }

    #[test]
    fn server_conditions_map_to_5xx() {
        assert_eq!(Error::ModelUnavailable("missing".into()).status_code(), 503);
        let storage: Error = rusqlite::Error::InvalidQuery.into();
        assert_eq!(storage.status_code(), 503);
        let inference = Error::inference("boom", "cause");
        assert_eq!(inference.status_code(), 500);
    }

    #[test]
    fn inference_keeps_its_cause() {
        use std::error::Error as _;
        let err = Error::inference("run failed", "tensor shape mismatch");
        assert_eq!(
            err.source().map(|s| s.to_string()).as_deref(),
            Some("tensor shape mismatch")
        );
    }

    #[test]
    fn serializes_as_message() {
        let json = serde_json::to_string(&Error::EmptyUpload).unwrap();
        assert_eq!(json, "\"No image provided\"");
    }
}
