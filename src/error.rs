//! Blob store error types and error response formatting.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Blob store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Configuration errors
    InvalidConfiguration,

    // Identifier errors
    EmptyBlobId,
    InvalidBlobId,
    InvalidBucketName,

    // Request errors
    InvalidArgument,

    // Storage errors
    BlobNotFound,
    StoreFailure,
    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidConfiguration => "InvalidConfiguration",
            ErrorCode::EmptyBlobId => "EmptyBlobId",
            ErrorCode::InvalidBlobId => "InvalidBlobId",
            ErrorCode::InvalidBucketName => "InvalidBucketName",
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::BlobNotFound => "BlobNotFound",
            ErrorCode::StoreFailure => "StoreFailure",
            ErrorCode::InternalError => "InternalError",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            ErrorCode::EmptyBlobId
            | ErrorCode::InvalidBlobId
            | ErrorCode::InvalidBucketName
            | ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,

            // 404 Not Found
            ErrorCode::BlobNotFound => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            ErrorCode::InvalidConfiguration
            | ErrorCode::StoreFailure
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidConfiguration => "The supplied configuration is invalid.",
            ErrorCode::EmptyBlobId => "A blob id must not be empty.",
            ErrorCode::InvalidBlobId => "The blob id carries a malformed generation tag.",
            ErrorCode::InvalidBucketName => "The specified bucket name is invalid.",
            ErrorCode::InvalidArgument => "Invalid arguments supplied in the user request",
            ErrorCode::BlobNotFound => "The specified blob does not exist.",
            ErrorCode::StoreFailure => "The underlying blob store failed.",
            ErrorCode::InternalError => "The server encountered an internal error. Please retry the request.",
        }
    }
}

/// Blob store error with code and message.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct StorageError {
    pub code: ErrorCode,
    pub message: String,
    /// Extra context, such as the name of a rejected request parameter.
    pub details: Option<String>,
}

impl StorageError {
    /// Creates a new storage error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
            details: None,
        }
    }

    /// Creates a new storage error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attaches details to this error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Shorthand for a rejected request argument.
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument).with_details(details)
    }

    /// Shorthand for a failure reported by a storage backend.
    pub fn store_failure(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::StoreFailure, message)
    }

    /// Returns true when this error signals an absent blob.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::BlobNotFound
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            return StorageError::new(ErrorCode::BlobNotFound);
        }
        StorageError::store_failure(e.to_string())
    }
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let body = json!({
            "statusCode": status.as_u16(),
            "type": self.code.as_str(),
            "message": self.message,
            "details": self.details,
        });

        (status, Json(body)).into_response()
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_carries_details() {
        let error = StorageError::invalid_argument("'expectedBlobCount' must be strictly positive");
        assert_eq!(error.code, ErrorCode::InvalidArgument);
        assert_eq!(error.code.status_code(), StatusCode::BAD_REQUEST);
        assert!(error.details.unwrap().contains("expectedBlobCount"));
    }

    #[test]
    fn io_not_found_maps_to_blob_not_found() {
        let error = StorageError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(error.is_not_found());

        let error = StorageError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert_eq!(error.code, ErrorCode::StoreFailure);
    }
}
