//! Error types for the provider core
//!
//! This module defines all error types used throughout the crate. The
//! variants line up with the error kinds surfaced to users as diagnostics.

use crate::path::AttrPath;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a build/flatten failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationKind {
    /// A required field is absent
    MissingRequired,
    /// A value is outside its enumeration
    InvalidEnum,
    /// Zero or several variants of a tagged union are present
    AmbiguousUnion,
    /// A value has the wrong semantic type
    TypeMismatch,
    /// A string could not be parsed (numbers, JSON text, timestamps)
    ParseError,
}

impl TranslationKind {
    /// Stable snake_case name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationKind::MissingRequired => "missing_required",
            TranslationKind::InvalidEnum => "invalid_enum",
            TranslationKind::AmbiguousUnion => "ambiguous_union",
            TranslationKind::TypeMismatch => "type_mismatch",
            TranslationKind::ParseError => "parse_error",
        }
    }
}

impl fmt::Display for TranslationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for the provider
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed user input, detected before any network call
    #[error("Configuration error{}: {message}", fmt_path(.path))]
    Config {
        /// Location in the configuration tree, when known
        path: Option<AttrPath>,
        /// Human readable message
        message: String,
    },

    /// Build/flatten invariant violation
    #[error("Translation error at {path}: {kind}: {message}")]
    Translation {
        /// Location in the configuration tree
        path: AttrPath,
        /// Failure classification
        kind: TranslationKind,
        /// Human readable message
        message: String,
    },

    /// The remote object does not exist (HTTP 404)
    #[error("Remote resource not found: {0}")]
    RemoteNotFound(String),

    /// The remote rejected the request (4xx other than 404/409/429)
    #[error("Remote rejected request ({status}): {body}")]
    RemoteRejected {
        /// HTTP status code
        status: u16,
        /// Response body, verbatim
        body: String,
    },

    /// Retryable failure (5xx or transport)
    #[error("Transient error: {0}")]
    Transient(String),

    /// HTTP 429
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Response body or reason
        message: String,
        /// Server supplied Retry-After
        retry_after: Option<Duration>,
    },

    /// Optimistic concurrency failure or duplicate
    #[error("Conflict: {message}")]
    Conflict {
        /// Response body or reason
        message: String,
        /// Current remote version, when the resource is version-gated
        current_version: Option<i64>,
    },

    /// Cooperative cancellation was observed
    #[error("Operation cancelled")]
    Cancelled,

    /// Authentication failure or malformed endpoint; aborts the run
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// State store errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

fn fmt_path(path: &Option<AttrPath>) -> String {
    match path {
        Some(p) if !p.is_root() => format!(" at {}", p),
        _ => String::new(),
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            path: None,
            message: msg.into(),
        }
    }

    /// Create a configuration error anchored at a path
    pub fn config_at(path: AttrPath, msg: impl Into<String>) -> Self {
        Self::Config {
            path: Some(path),
            message: msg.into(),
        }
    }

    /// Create a translation error
    pub fn translation(path: AttrPath, kind: TranslationKind, msg: impl Into<String>) -> Self {
        Self::Translation {
            path,
            kind,
            message: msg.into(),
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::RemoteNotFound(msg.into())
    }

    /// Create a rejection error
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::RemoteRejected {
            status,
            body: body.into(),
        }
    }

    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>, current_version: Option<i64>) -> Self {
        Self::Conflict {
            message: msg.into(),
            current_version,
        }
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Whether the retry loop may try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::RateLimited { .. })
    }

    /// Whether the whole run must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// Whether this is a 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::RemoteNotFound(_))
    }

    /// User-facing error kind name
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Translation { .. } => "translation_error",
            Error::RemoteNotFound(_) => "remote_not_found",
            Error::RemoteRejected { .. } => "remote_rejected",
            Error::Transient(_) | Error::RateLimited { .. } => "transient",
            Error::Conflict { .. } => "conflict",
            Error::Cancelled => "cancelled",
            Error::Fatal(_) => "fatal",
            Error::StateStore(_) | Error::Io(_) | Error::Json(_) | Error::Other(_) => "internal",
        }
    }

    /// Path into the resource tree, for errors that carry one
    pub fn path(&self) -> Option<&AttrPath> {
        match self {
            Error::Config { path, .. } => path.as_ref(),
            Error::Translation { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Translation kind, for translation errors
    pub fn translation_kind(&self) -> Option<TranslationKind> {
        match self {
            Error::Translation { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
