//! Error type shared by the library modules.
//!
//! Every variant except [`ReconcileError::ValidationMismatch`] signals an
//! environment or configuration defect and should abort the test case. A
//! validation mismatch is the ordinary unhappy path and is produced only when
//! a caller converts a failing [`ValidationReport`](crate::validate::ValidationReport)
//! into an error.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to load schema from {path:?}: {message}")]
    SchemaLoad { path: PathBuf, message: String },

    #[error("Schema mismatch at '{path}': {message}")]
    SchemaMismatch { path: String, message: String },

    #[error("Mapping configuration error{}: {message}", location_suffix(.scope, .line))]
    MappingConfig {
        scope: Option<String>,
        line: Option<usize>,
        message: String,
    },

    #[error("Store error for '{target}': {message}")]
    Store { target: String, message: String },

    #[error("{failures} field(s) failed validation; first: {first}")]
    ValidationMismatch { failures: usize, first: String },

    #[error("Key '{key}' at '{path}' collides with another key after renaming")]
    KeyCollision { path: String, key: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReconcileError {
    pub fn schema_mismatch(path: impl Into<String>, message: impl Into<String>) -> Self {
        ReconcileError::SchemaMismatch {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        ReconcileError::MappingConfig {
            scope: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn mapping_in_scope(scope: impl Into<String>, message: impl Into<String>) -> Self {
        ReconcileError::MappingConfig {
            scope: Some(scope.into()),
            line: None,
            message: message.into(),
        }
    }

    pub fn mapping_at_line(line: usize, message: impl Into<String>) -> Self {
        ReconcileError::MappingConfig {
            scope: None,
            line: Some(line),
            message: message.into(),
        }
    }

    pub fn store(target: impl Into<String>, message: impl Into<String>) -> Self {
        ReconcileError::Store {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReconcileError::Io {
            path: path.into(),
            source,
        }
    }
}

fn location_suffix(scope: &Option<String>, line: &Option<usize>) -> String {
    match (scope, line) {
        (Some(scope), Some(line)) => format!(" in scope '{scope}' (line {line})"),
        (Some(scope), None) => format!(" in scope '{scope}'"),
        (None, Some(line)) => format!(" (line {line})"),
        (None, None) => String::new(),
    }
}
