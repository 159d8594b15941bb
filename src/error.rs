//! Error handling module
//!
//! Provides the error taxonomy shared by every stage of a dump run.

use crate::catalog::{Dialect, ObjectKind};
use crate::dumper::DumpStage;
use thiserror::Error;

/// Library-wide error type
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dialect {dialect} does not support {kind}")]
    DialectUnsupported { dialect: Dialect, kind: ObjectKind },

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Introspection error ({kind}): {message}")]
    Introspection { kind: ObjectKind, message: String },

    #[error("Generation error for {kind} {name}: {message}")]
    Generation {
        kind: ObjectKind,
        name: String,
        message: String,
    },

    #[error("Formatting error: {0}")]
    Formatting(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DumpError {
    pub fn introspection(kind: ObjectKind, message: impl Into<String>) -> Self {
        DumpError::Introspection {
            kind,
            message: message.into(),
        }
    }

    pub fn generation(kind: ObjectKind, name: &str, message: impl Into<String>) -> Self {
        DumpError::Generation {
            kind,
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        DumpError::Persistence(message.into())
    }

    /// Stable code for callers that surface errors outside Rust
    pub fn code(&self) -> &'static str {
        match self {
            DumpError::Config(_) => "CONFIG_ERROR",
            DumpError::DialectUnsupported { .. } => "DIALECT_UNSUPPORTED",
            DumpError::CatalogUnavailable(_) | DumpError::Introspection { .. } => {
                "INTROSPECTION_ERROR"
            }
            DumpError::Generation { .. } => "GENERATION_ERROR",
            DumpError::Formatting(_) => "FORMATTING_ERROR",
            DumpError::Persistence(_) => "PERSISTENCE_ERROR",
            DumpError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<tokio_postgres::Error> for DumpError {
    fn from(e: tokio_postgres::Error) -> Self {
        DumpError::Persistence(format!("Database error: {}", e))
    }
}

impl From<deadpool_postgres::PoolError> for DumpError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        DumpError::Persistence(format!("Database pool error: {}", e))
    }
}

/// A failed dump run: the stage that failed plus the underlying cause
#[derive(Error, Debug)]
#[error("dump failed while {stage}: {error}")]
pub struct RunFailure {
    pub stage: DumpStage,
    #[source]
    pub error: DumpError,
}

/// Result type alias for library operations
pub type DumpResult<T> = Result<T, DumpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = DumpError::DialectUnsupported {
            dialect: Dialect::Sqlite,
            kind: ObjectKind::Function,
        };
        assert_eq!(err.code(), "DIALECT_UNSUPPORTED");
        assert_eq!(err.to_string(), "Dialect sqlite does not support function");
    }

    #[test]
    fn test_run_failure_names_stage() {
        let failure = RunFailure {
            stage: DumpStage::Persisting,
            error: DumpError::persistence("disk full"),
        };
        assert_eq!(
            failure.to_string(),
            "dump failed while persisting: Persistence error: disk full"
        );
    }
}
