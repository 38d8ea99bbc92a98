//! Error taxonomy for migration operations.
//!
//! Transport and provisioning failures are errors. Per-document upsert
//! failures and verification mismatches are not: they are recorded on the
//! [`RestoreOutcome`](crate::RestoreOutcome) and never abort a run.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Errors that can occur while exporting, restoring or syncing a database.
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Connection failed during {operation}: {message}")]
    Connectivity { operation: String, message: String },

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    #[error("Unexpected HTTP {status} during {operation}: {body}")]
    Http {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Malformed response during {operation}: {message}")]
    MalformedResponse { operation: String, message: String },

    #[error("Invalid backup format: {0}")]
    Format(String),

    #[error("Invalid JSON in backup: {0}")]
    Parse(String),

    #[error("Failed to provision database '{database}' (HTTP {status}): {message}")]
    Provisioning {
        database: String,
        status: u16,
        message: String,
    },

    #[error("Bulk restore into '{database}' failed (HTTP {status}): {body}")]
    BulkRejected {
        database: String,
        status: u16,
        body: String,
    },

    #[error("I/O error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup artifact already exists: {}", .0.display())]
    ArtifactExists(PathBuf),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("Backup failed: {0}")]
    BackupFailed(Box<MigrateError>),

    #[error("Script fallback failed: {0}")]
    Script(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl MigrateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrateError::Io {
            path: path.into(),
            source,
        }
    }

    /// Maps a reqwest failure onto the taxonomy, keeping timeouts distinct.
    pub(crate) fn transport(operation: impl Into<String>, err: reqwest::Error) -> Self {
        let operation = operation.into();
        if err.is_timeout() {
            MigrateError::Timeout { operation }
        } else {
            MigrateError::Connectivity {
                operation,
                message: err.to_string(),
            }
        }
    }

    /// Returns true for timeouts.
    pub fn is_timeout(&self) -> bool {
        match self {
            MigrateError::Timeout { .. } => true,
            MigrateError::BackupFailed(inner) => inner.is_timeout(),
            _ => false,
        }
    }

    /// Returns true if the failure was at the transport level and a caller
    /// may reasonably retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrateError::Connectivity { .. } | MigrateError::Timeout { .. } => true,
            MigrateError::BackupFailed(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error was raised by the export half of a sync.
    pub fn is_backup_failure(&self) -> bool {
        matches!(self, MigrateError::BackupFailed(_))
    }
}
