//! Backup artifacts: writing, reading and cataloguing.
//!
//! An artifact is one JSON file per database, grouped in timestamped
//! directories:
//! ```text
//! <ROOT>/
//!   backup_20240131-142501/
//!     orders.json
//!     customers.json
//! ```
//! Database names are percent-encoded into the file stem, so `team/orders`
//! is stored as `team%2Forders.json`.
//! The file body is the `_bulk_docs` request shape,
//! `{"new_edits":false,"docs":[...]}`, so it can be replayed as is.

mod catalog;
mod reader;
mod writer;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::{MigrateError, Result};

pub use catalog::{BackupCatalog, BackupEntry};
pub use reader::{locate_artifact, parse_artifact, read_artifact, ArtifactShape, ParsedArtifact};
pub use writer::{serialize_documents, SnapshotWriter};

/// Prefix of the directories the writer creates.
pub const BACKUP_DIR_PREFIX: &str = "backup_";
/// `strftime` format of the directory timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
/// Extension of artifact files.
pub const ARTIFACT_EXTENSION: &str = "json";

/// A persisted document set for one database.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupArtifact {
    pub database: String,
    pub created_at: DateTime<Local>,
    pub path: PathBuf,
    pub document_count: usize,
    pub design_count: usize,
    pub size_bytes: u64,
}

impl BackupArtifact {
    /// Number of regular (non-design) documents.
    pub fn regular_count(&self) -> usize {
        self.document_count - self.design_count
    }

    /// The `backup_<timestamp>` directory holding the file.
    pub fn directory(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Deletes the artifact file, and its directory if that is left empty.
    pub fn remove(&self) -> Result<()> {
        fs::remove_file(&self.path).map_err(|e| MigrateError::io(&self.path, e))?;
        if let Some(dir) = self.directory() {
            let empty = fs::read_dir(dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if empty {
                fs::remove_dir(dir).map_err(|e| MigrateError::io(dir, e))?;
            }
        }
        Ok(())
    }
}

/// Name of the directory for a backup taken at `created_at`.
pub fn backup_dir_name(created_at: &DateTime<Local>) -> String {
    format!("{}{}", BACKUP_DIR_PREFIX, created_at.format(TIMESTAMP_FORMAT))
}

/// File name of the artifact for `database`.
pub fn artifact_file_name(database: &str) -> String {
    format!("{}.{}", urlencoding::encode(database), ARTIFACT_EXTENSION)
}

/// Database name stored in an artifact file stem.
pub fn database_from_stem(stem: &str) -> String {
    urlencoding::decode(stem)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| stem.to_string())
}

/// Rejects database names that cannot be written as an artifact.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Rejects backup directory names that are not a single path segment.
pub fn validate_backup_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(MigrateError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_dir_name() {
        let ts = Local.with_ymd_and_hms(2024, 1, 31, 14, 25, 1).unwrap();
        assert_eq!(backup_dir_name(&ts), "backup_20240131-142501");
    }

    #[test]
    fn test_artifact_file_name() {
        assert_eq!(artifact_file_name("orders"), "orders.json");
        assert_eq!(artifact_file_name("team/orders"), "team%2Forders.json");
        assert_eq!(artifact_file_name("a$b(1)+c"), "a%24b%281%29%2Bc.json");
    }

    #[test]
    fn test_database_from_stem() {
        assert_eq!(database_from_stem("orders"), "orders");
        assert_eq!(database_from_stem("team%2Forders"), "team/orders");
        assert_eq!(database_from_stem("a%24b%281%29%2Bc"), "a$b(1)+c");
    }

    #[test]
    fn test_validate_database_name() {
        assert!(validate_database_name("orders").is_ok());
        assert!(validate_database_name("team/orders").is_ok());
        assert!(validate_database_name("").is_err());
    }

    #[test]
    fn test_validate_backup_name() {
        assert!(validate_backup_name("nightly").is_ok());
        assert!(validate_backup_name("backup_20240131-142501").is_ok());
        assert!(validate_backup_name("").is_err());
        assert!(validate_backup_name("team/orders").is_err());
        assert!(validate_backup_name("../etc").is_err());
        assert!(validate_backup_name(".hidden").is_err());
    }
}
