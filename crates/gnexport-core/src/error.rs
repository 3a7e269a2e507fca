use serde::Serialize;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stable error identifiers returned to API clients as `api_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidExport,
    NoResultFound,
    InsufficientRightsError,
    EmptyDataSetError,
    NonTransformableError,
    InvalidFilter,
    LoggedError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidExport => "InvalidExport",
            Self::NoResultFound => "NoResultFound",
            Self::InsufficientRightsError => "InsufficientRightsError",
            Self::EmptyDataSetError => "EmptyDataSetError",
            Self::NonTransformableError => "NonTransformableError",
            Self::InvalidFilter => "InvalidFilter",
            Self::LoggedError => "LoggedError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced anywhere in the export pipeline.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Export id out of range or format not enabled. Raised before any query.
    #[error("Invalid export: {0}")]
    InvalidExport(String),

    #[error("{0}")]
    NoResultFound(String),

    #[error("Insufficient rights: {0}")]
    InsufficientRights(String),

    #[error("{0}")]
    EmptyDataSet(String),

    /// The requested format cannot render this dataset (e.g. Shapefile without geometry).
    #[error("{0}")]
    NonTransformable(String),

    /// Filter rejected in strict mode.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Anything else. The cause stays server-side unless debug output is enabled.
    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl ExportError {
    pub fn invalid_export(msg: impl Into<String>) -> Self {
        Self::InvalidExport(msg.into())
    }

    pub fn no_result_found(msg: impl Into<String>) -> Self {
        Self::NoResultFound(msg.into())
    }

    pub fn insufficient_rights(msg: impl Into<String>) -> Self {
        Self::InsufficientRights(msg.into())
    }

    pub fn empty_dataset(msg: impl Into<String>) -> Self {
        Self::EmptyDataSet(msg.into())
    }

    pub fn non_transformable(msg: impl Into<String>) -> Self {
        Self::NonTransformable(msg.into())
    }

    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        Self::InvalidFilter(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it as the `source()` chain.
    pub fn with_source<E>(msg: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidExport(_) => ErrorKind::InvalidExport,
            Self::NoResultFound(_) => ErrorKind::NoResultFound,
            Self::InsufficientRights(_) => ErrorKind::InsufficientRightsError,
            Self::EmptyDataSet(_) => ErrorKind::EmptyDataSetError,
            Self::NonTransformable(_) => ErrorKind::NonTransformableError,
            Self::InvalidFilter(_) => ErrorKind::InvalidFilter,
            Self::Internal { .. } => ErrorKind::LoggedError,
        }
    }

    /// Full cause chain rendered on one line, for logs.
    pub fn detail(&self) -> String {
        let mut out = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            current = cause.source();
        }
        out
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source("JSON serialization failed", err)
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source("I/O error", err)
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
