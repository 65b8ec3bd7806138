use crate::services::{coordinator::NotesError, object_store::ObjectStoreError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
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

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<NotesError> for AppError {
    fn from(err: NotesError) -> Self {
        let status = match &err {
            NotesError::NoteNotFound(_)
            | NotesError::AttachmentNotFound { .. }
            | NotesError::ObjectMissing(_) => StatusCode::NOT_FOUND,
            NotesError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            NotesError::Conflict { .. } => StatusCode::CONFLICT,
            NotesError::MetadataUnavailable(_) | NotesError::ObjectStoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            NotesError::PartialCascadeFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        let status = match &err {
            ObjectStoreError::NotFound(_) => StatusCode::NOT_FOUND,
            ObjectStoreError::InvalidObjectKey | ObjectStoreError::InvalidTtl => {
                StatusCode::BAD_REQUEST
            }
            ObjectStoreError::InvalidSignature | ObjectStoreError::Expired => {
                StatusCode::FORBIDDEN
            }
            ObjectStoreError::SigningKey
            | ObjectStoreError::Sqlx(_)
            | ObjectStoreError::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_errors_map_to_statuses() {
        let cases = [
            (NotesError::NoteNotFound("n".into()), StatusCode::NOT_FOUND),
            (
                NotesError::InvalidRequest("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                NotesError::Conflict {
                    id: "n".into(),
                    expected: 1,
                    actual: 2,
                },
                StatusCode::CONFLICT,
            ),
            (
                NotesError::ObjectStoreUnavailable(ObjectStoreError::Io(std::io::Error::other(
                    "down",
                ))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                NotesError::PartialCascadeFailure {
                    note_id: "n".into(),
                    deleted: 1,
                    remaining: 1,
                    source: ObjectStoreError::Io(std::io::Error::other("down")),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn signature_failures_are_forbidden() {
        assert_eq!(
            AppError::from(ObjectStoreError::Expired).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(ObjectStoreError::InvalidSignature).status,
            StatusCode::FORBIDDEN
        );
    }
}
