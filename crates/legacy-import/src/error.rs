//! Error types for the import engine.

use thiserror::Error;

/// Exit code for configuration errors (invalid YAML, unknown types, bad units).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when one or more units failed a precondition.
pub const EXIT_UNIT_FAILED: u8 = 2;
/// Exit code for external dump/restore tool failures.
pub const EXIT_BULK_ERROR: u8 = 3;
/// Exit code for remote or local database failures.
pub const EXIT_DATABASE_ERROR: u8 = 4;
/// Exit code for filesystem errors (missing config file, unwritable asset dir).
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code when the run was interrupted.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for import operations.
#[derive(Error, Debug)]
pub enum ImportError {
    /// Configuration error (invalid YAML, missing class or strategy, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A unit cannot run against its target type
    #[error("Precondition failed for {unit}: {message}")]
    Precondition { unit: String, message: String },

    /// Legacy database connection or query error with context
    #[error("Remote database error: {message}\n  Context: {context}")]
    Remote { message: String, context: String },

    /// Destination database connection or query error with context
    #[error("Local database error: {message}\n  Context: {context}")]
    Local { message: String, context: String },

    /// A mapping would pair a record that is already paired elsewhere
    #[error(
        "Mapping conflict for {object_type}: local {local_id} <-> remote {remote_id} ({existing})"
    )]
    MappingConflict {
        object_type: String,
        local_id: i64,
        remote_id: i64,
        existing: String,
    },

    /// Asset could not be fetched or written
    #[error("Fetch failed for {path}: {message}")]
    Fetch { path: String, message: String },

    /// External dump/restore tool failed
    #[error("Bulk import failed: {0}")]
    Bulk(String),

    /// One or more units failed during the run
    #[error("{count} unit(s) failed: {}", units.join(", "))]
    UnitsFailed { count: usize, units: Vec<String> },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Import was cancelled (SIGINT, etc.)
    #[error("Import cancelled")]
    Cancelled,
}

impl ImportError {
    /// Create a Remote error with context about where it occurred
    pub fn remote(message: impl ToString, context: impl Into<String>) -> Self {
        ImportError::Remote {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Local error with context about where it occurred
    pub fn local(message: impl ToString, context: impl Into<String>) -> Self {
        ImportError::Local {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Precondition error for a unit
    pub fn precondition(unit: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::Precondition {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Create a Fetch error
    pub fn fetch(path: impl Into<String>, message: impl ToString) -> Self {
        ImportError::Fetch {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ImportError::Config(_) | ImportError::Yaml(_) | ImportError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            ImportError::Precondition { .. } | ImportError::UnitsFailed { .. } => {
                EXIT_UNIT_FAILED
            }
            ImportError::Bulk(_) => EXIT_BULK_ERROR,
            ImportError::Remote { .. }
            | ImportError::Local { .. }
            | ImportError::MappingConflict { .. } => EXIT_DATABASE_ERROR,
            ImportError::Io(_) | ImportError::Fetch { .. } | ImportError::Http(_) => EXIT_IO_ERROR,
            ImportError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;
