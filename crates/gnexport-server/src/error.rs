//! HTTP error boundary.
//!
//! Every failure leaves the service as `{"api_error": <kind>, "message"?: ...}`.
//! Internal causes are logged here and only echoed to the caller in debug mode.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gnexport_core::{ErrorKind, ExportError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{error}")]
    Export {
        #[source]
        error: ExportError,
        debug: bool,
    },

    /// Missing or malformed role header.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Etalab export is disabled")]
    EtalabDisabled,

    /// The Etalab output directory does not exist.
    #[error("FileNotFoundError : {0}")]
    FileNotFound(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    api_error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ApiError {
    pub fn export(error: ExportError, debug: bool) -> Self {
        Self::Export { error, debug }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Export { error, .. } => match error.kind() {
                ErrorKind::InvalidExport
                | ErrorKind::NoResultFound
                | ErrorKind::EmptyDataSetError
                | ErrorKind::NonTransformableError => StatusCode::NOT_FOUND,
                ErrorKind::InsufficientRightsError => StatusCode::FORBIDDEN,
                ErrorKind::InvalidFilter | ErrorKind::LoggedError => StatusCode::BAD_REQUEST,
            },
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::EtalabDisabled => StatusCode::NOT_IMPLEMENTED,
            ApiError::FileNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn api_error(&self) -> &'static str {
        match self {
            ApiError::Export { error, .. } => error.kind().as_str(),
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::EtalabDisabled => "EtalabDisabled",
            ApiError::FileNotFound(_) => "FileNotFoundError",
        }
    }

    fn message(&self) -> Option<String> {
        match self {
            ApiError::Export { error, debug } => match error.kind() {
                ErrorKind::NoResultFound
                | ErrorKind::EmptyDataSetError
                | ErrorKind::NonTransformableError
                | ErrorKind::InvalidFilter => Some(error.to_string()),
                ErrorKind::LoggedError if *debug => Some(error.detail()),
                _ => None,
            },
            ApiError::Unauthorized(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(error: ExportError) -> Self {
        Self::export(error, false)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Export { error, .. } if error.kind() == ErrorKind::LoggedError => {
                tracing::error!(error = %error.detail(), "export failed");
            }
            ApiError::FileNotFound(path) => {
                tracing::error!(path = %path, "etalab output directory is missing");
            }
            other => {
                tracing::debug!(api_error = other.api_error(), error = %other, "request rejected");
            }
        }

        let body = ErrorBody {
            api_error: self.api_error(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}
