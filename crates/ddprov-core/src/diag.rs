//! User-visible diagnostics
//!
//! Lifecycle handlers report failures and warnings as diagnostics rather
//! than bare errors. Warnings never abort; errors do.

use crate::error::Error;
use crate::path::AttrPath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Reported, does not abort
    Warning,
    /// Aborts the operation
    Error,
}

/// A single user-visible message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,

    /// One-line summary
    pub summary: String,

    /// Optional multi-line detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Optional location inside the resource tree
    #[serde(default, skip_serializing_if = "Option::is_none", with = "path_serde")]
    pub path: Option<AttrPath>,

    /// Error kind name for error diagnostics (`conflict`, `fatal`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Current remote version carried by conflict diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<i64>,
}

impl Diagnostic {
    /// Create an error diagnostic
    pub fn error(summary: impl Into<String>) -> Self {
        Self::new(Severity::Error, summary)
    }

    /// Create a warning diagnostic
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::new(Severity::Warning, summary)
    }

    fn new(severity: Severity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            path: None,
            kind: None,
            current_version: None,
        }
    }

    /// Attach a detail block
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach a path
    pub fn with_path(mut self, path: AttrPath) -> Self {
        self.path = Some(path);
        self
    }

    /// Prefix the summary with the resource kind and identifier
    pub fn in_resource(mut self, kind: &str, id: Option<&str>) -> Self {
        self.summary = match id {
            Some(id) => format!("{} \"{}\": {}", kind, id, self.summary),
            None => format!("{}: {}", kind, self.summary),
        };
        self
    }

    /// Whether this is an error diagnostic
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl From<&Error> for Diagnostic {
    fn from(err: &Error) -> Self {
        let summary = match err {
            Error::Config { .. } => "invalid configuration".to_string(),
            Error::Translation { kind, .. } => format!("translation failed ({})", kind),
            Error::RemoteNotFound(_) => "remote object not found".to_string(),
            Error::RemoteRejected { status, .. } => format!("request rejected with status {}", status),
            Error::Transient(_) | Error::RateLimited { .. } => "retry timeout exceeded".to_string(),
            Error::Conflict { current_version: Some(v), .. } => {
                format!("version conflict, current remote version is {}", v)
            }
            Error::Conflict { .. } => "conflict".to_string(),
            Error::Cancelled => "operation cancelled".to_string(),
            Error::Fatal(_) => "fatal error".to_string(),
            _ => "internal error".to_string(),
        };

        let mut diag = Diagnostic::error(summary).with_detail(err.to_string());
        diag.kind = Some(err.kind_name().to_string());
        if let Some(path) = err.path() {
            diag.path = Some(path.clone());
        }
        if let Error::Conflict { current_version, .. } = err {
            diag.current_version = *current_version;
        }
        diag
    }
}

impl From<Error> for Diagnostic {
    fn from(err: Error) -> Self {
        Diagnostic::from(&err)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        };
        write!(f, "{}: {}", label, self.summary)?;
        if let Some(path) = &self.path {
            write!(f, " (at {})", path)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\n  {}", detail.replace('\n', "\n  "))?;
        }
        Ok(())
    }
}

/// Collection of diagnostics returned by a lifecycle operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic
    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    /// Add every diagnostic from another collection
    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.0.extend(other);
    }

    /// Whether any error diagnostic is present
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    /// Error diagnostics
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    /// Warning diagnostics
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| !d.is_error())
    }

    /// All diagnostics
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    /// Number of diagnostics
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First error carrying the given kind name
    pub fn find_kind(&self, kind: &str) -> Option<&Diagnostic> {
        self.errors().find(|d| d.kind.as_deref() == Some(kind))
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }
}

mod path_serde {
    use crate::path::AttrPath;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(path: &Option<AttrPath>, s: S) -> Result<S::Ok, S::Error> {
        match path {
            Some(p) => s.serialize_some(&p.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<AttrPath>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        Ok(raw.map(|s| {
            s.split('.')
                .fold(AttrPath::root(), |p, part| p.key(part.to_string()))
        }))
    }
}
