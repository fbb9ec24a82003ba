use std::fmt;

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Failures reported by a user storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What went wrong, independent of where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    WrongPassword,
    WrongEmail,
    Validation,
    Unauthenticated,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::WrongPassword => "wrong password",
            ErrorKind::WrongEmail => "wrong email",
            ErrorKind::Validation => "validation error",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Domain error: a tagged kind plus the chain of components it passed through.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    fields: Vec<FieldError>,
    trail: Vec<&'static str>,
    #[source]
    source: Option<anyhow::Error>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: Vec::new(),
            trail: Vec::new(),
            source: None,
        }
    }

    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        let source = source.into();
        Self {
            message: source.to_string(),
            source: Some(source),
            ..Self::new(ErrorKind::Internal, "")
        }
    }

    pub fn validation(fields: Vec<FieldError>) -> Self {
        Self {
            fields,
            ..Self::new(ErrorKind::Validation, "validation error")
        }
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound, "not found")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[cfg(test)]
    pub fn fields(&self) -> &[FieldError] {
        &self.fields
    }

    /// Component frames, outermost first.
    pub fn trail(&self) -> String {
        self.trail.iter().rev().copied().collect::<Vec<_>>().join(" -> ")
    }

    pub fn at(mut self, frame: &'static str) -> Self {
        self.trail.push(frame);
        self
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => AppError::not_found(),
            StorageError::Conflict => AppError::new(ErrorKind::AlreadyExists, "email already exists"),
            StorageError::Database(e) => AppError::internal(e),
        }
    }
}

pub trait ResultExt<T> {
    /// Converts the error into an [`AppError`] and records `frame` on its trail.
    fn at(self, frame: &'static str) -> Result<T, AppError>;
}

impl<T, E: Into<AppError>> ResultExt<T> for Result<T, E> {
    fn at(self, frame: &'static str) -> Result<T, AppError> {
        self.map_err(|e| e.into().at(frame))
    }
}

/// HTTP face of an [`AppError`]: a status and a `{code, message, fields}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    fields: Vec<FieldError>,
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
}

impl ApiError {
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let (status, message) = match err.kind() {
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "User Not Found"),
            ErrorKind::AlreadyExists => (StatusCode::UNPROCESSABLE_ENTITY, "email has been registered"),
            ErrorKind::WrongPassword => (StatusCode::BAD_REQUEST, "Wrong password"),
            ErrorKind::WrongEmail => (StatusCode::BAD_REQUEST, "Wrong email"),
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation error"),
            ErrorKind::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Server error"),
        };
        if status.is_server_error() {
            error!(error = %err, trail = %err.trail(), "request failed");
        } else {
            warn!(error = %err, trail = %err.trail(), "request rejected");
        }
        Self {
            status,
            message: message.to_string(),
            fields: err.fields,
        }
    }
}

// Undecodable input is a validation failure like any other.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::from(AppError::validation(vec![FieldError {
            field: "body",
            message: rejection.body_text(),
        }]))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::from(AppError::validation(vec![FieldError {
            field: "path",
            message: rejection.body_text(),
        }]))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.status.as_u16(),
            message: self.message,
            fields: self.fields,
        };
        (self.status, Json(body)).into_response()
    }
}
