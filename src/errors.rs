use crate::services::transfer_service::TransferError;
use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 405 Method Not Allowed
    pub fn method_not_allowed(method: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Invalid Method: {}", method),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "err: {}", self.message);
        } else {
            tracing::warn!(status = self.status.as_u16(), "{}", self.message);
        }

        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{}\n", self.message),
        )
            .into_response()
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::MalformedPath(_)
            | TransferError::MissingContentLength
            | TransferError::InvalidContentLength(_)
            | TransferError::LengthMismatch { .. } => AppError::bad_request(err.to_string()),
            TransferError::Conflict(_) => AppError::new(StatusCode::CONFLICT, err.to_string()),
            TransferError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "Object Not Found"),
            TransferError::MissingChunk { .. }
            | TransferError::ChunkSizeMismatch { .. }
            | TransferError::Store(_)
            | TransferError::Body(_) => AppError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::object::ObjectId, services::object_store::StoreError};

    fn id() -> ObjectId {
        ObjectId::new("b1", "obj1").unwrap()
    }

    #[test]
    fn transfer_errors_map_to_statuses() {
        let cases = [
            (TransferError::MissingContentLength, StatusCode::BAD_REQUEST),
            (
                TransferError::InvalidContentLength("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (TransferError::Conflict(id()), StatusCode::CONFLICT),
            (TransferError::NotFound(id()), StatusCode::NOT_FOUND),
            (
                TransferError::MissingChunk { id: id(), num: 3 },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                TransferError::Store(StoreError::Sqlx(sqlx::Error::PoolClosed)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn missing_chunk_is_not_a_not_found() {
        let err = TransferError::from_chunk_read(StoreError::ChunkNotFound { id: id(), num: 1 });
        assert_eq!(AppError::from(err).status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
