//! Writes document sets to backup artifacts.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::{artifact_file_name, backup_dir_name, validate_database_name, BackupArtifact};
use crate::couch::CouchApi;
use crate::document::{classify, Document};
use crate::error::{MigrateError, Result};

/// Exports databases into timestamped backup directories under a root.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fetches every document of `db` and persists it as a new artifact.
    ///
    /// Nothing is written unless the fetch succeeds completely.
    pub async fn export<A: CouchApi>(&self, api: &A, db: &str) -> Result<BackupArtifact> {
        validate_database_name(db)?;
        tracing::info!("Starting backup of '{}'", db);

        let docs = api.fetch_all_docs(db).await?;
        self.write(db, &docs)
    }

    /// Persists a document set as an artifact stamped with the current time.
    pub fn write(&self, db: &str, docs: &[Document]) -> Result<BackupArtifact> {
        self.write_at(db, docs, Local::now())
    }

    /// Persists a document set as an artifact stamped with `created_at`.
    ///
    /// The file is written to a temporary name and linked into place, so a
    /// failure never leaves a partial artifact. An existing artifact for the
    /// same database and timestamp is never overwritten.
    pub fn write_at(
        &self,
        db: &str,
        docs: &[Document],
        created_at: DateTime<Local>,
    ) -> Result<BackupArtifact> {
        validate_database_name(db)?;

        let classified = classify(docs);
        tracing::info!(
            "Found {} documents in '{}' ({} design, {} regular)",
            docs.len(),
            db,
            classified.design.len(),
            classified.regular.len()
        );

        let dir = self.root.join(backup_dir_name(&created_at));
        fs::create_dir_all(&dir).map_err(|e| MigrateError::io(&dir, e))?;

        let file_name = artifact_file_name(db);
        let path = dir.join(&file_name);
        let bytes = serialize_documents(docs)?;
        let temp_path = dir.join(format!(
            ".{}.{}.tmp",
            file_name,
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = write_file(&temp_path, &bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        // A hard link fails if the target exists, unlike rename.
        let linked = fs::hard_link(&temp_path, &path);
        let _ = fs::remove_file(&temp_path);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(MigrateError::ArtifactExists(path));
            }
            Err(e) => return Err(MigrateError::io(&path, e)),
        }

        let artifact = BackupArtifact {
            database: db.to_string(),
            created_at,
            path,
            document_count: docs.len(),
            design_count: classified.design.len(),
            size_bytes: bytes.len() as u64,
        };

        tracing::info!(
            "Backup of '{}' written to {} ({} bytes)",
            db,
            artifact.path.display(),
            artifact.size_bytes
        );

        Ok(artifact)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| MigrateError::io(path, e))?;
    file.write_all(bytes).map_err(|e| MigrateError::io(path, e))?;
    file.sync_all().map_err(|e| MigrateError::io(path, e))?;
    Ok(())
}

/// Serializes documents in the canonical artifact layout: one compact
/// document per line inside `{"new_edits":false,"docs":[ ... ]}`.
pub fn serialize_documents(docs: &[Document]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"{\"new_edits\":false,\"docs\":[\n");
    for (i, doc) in docs.iter().enumerate() {
        if i > 0 {
            buf.extend_from_slice(b",\n");
        }
        serde_json::to_writer(&mut buf, doc)
            .map_err(|e| MigrateError::Parse(format!("failed to serialize document: {}", e)))?;
    }
    buf.extend_from_slice(b"\n]}");
    Ok(buf)
}
