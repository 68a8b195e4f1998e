use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path `{path}` needs at least a page and a section segment")]
    TooFewSegments { path: String },
    #[error("path `{path}` has an empty segment at position {index}")]
    EmptySegment { path: String, index: usize },
    #[error("path `{path}` has invalid segment `{segment}`")]
    InvalidSegment { path: String, segment: String },
    #[error("path `{path}` uses the repeater placeholder as page or section")]
    MisplacedPlaceholder { path: String },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("markup error at byte {offset}: {source}")]
    Markup {
        offset: usize,
        #[source]
        source: quick_xml::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("source directory {0} does not exist")]
    MissingRoot(PathBuf),
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
}

/// Persisted entity kinds, used in sync results and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Page,
    Section,
    Field,
    Content,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Page => "page",
            EntityKind::Section => "section",
            EntityKind::Field => "field",
            EntityKind::Content => "content",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{entity} `{key}`: {source}")]
    Store {
        entity: EntityKind,
        key: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{entity} `{key}`: cannot encode {what}: {source}")]
    Encode {
        entity: EntityKind,
        key: String,
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("transaction failed: {0}")]
    Transaction(#[source] rusqlite::Error),
}

impl SyncError {
    pub(crate) fn store(entity: EntityKind, key: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let key = key.into();
        move |source| SyncError::Store { entity, key, source }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no field with path `{0}`")]
    UnknownField(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ── Scan diagnostics ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    /// File could not be read or tokenized; it was skipped.
    Parse,
    /// Path grammar violation or conflicting duplicate; the field was excluded.
    Validation,
    /// Malformed modifier value; the value was ignored.
    Modifier,
    /// Conflicting duplicate resolved by first-wins.
    Duplicate,
    /// Type-specific configuration problem.
    FieldConfig,
}

/// One scan-time issue. Aggregated next to a still-usable schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub path: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            kind,
            file: None,
            line: None,
            column: None,
            path: None,
            message: message.into(),
        }
    }

    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            ..Diagnostic::warning(kind, message)
        }
    }

    pub fn at(mut self, file: &str, line: usize, column: usize) -> Self {
        self.file = Some(file.to_string());
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn in_file(mut self, file: &str) -> Self {
        self.file = Some(file.to_string());
        self
    }

    pub fn for_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(col)) => write!(f, "{}: {}:{}:{}: ", level, file, line, col)?,
            (Some(file), _, _) => write!(f, "{}: {}: ", level, file)?,
            _ => write!(f, "{}: ", level)?,
        }
        if let Some(path) = &self.path {
            write!(f, "[{}] ", path)?;
        }
        f.write_str(&self.message)
    }
}
