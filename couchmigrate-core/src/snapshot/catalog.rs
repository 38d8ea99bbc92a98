//! Listing and removing backups under a root directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::{database_from_stem, validate_backup_name, ARTIFACT_EXTENSION};
use crate::error::{MigrateError, Result};

/// A backup directory and the artifacts inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    /// Database names, from the artifact file stems.
    pub databases: Vec<String>,
    pub file_count: usize,
    pub size_bytes: u64,
    pub created: DateTime<Local>,
}

impl BackupEntry {
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// The set of backups stored under a root directory.
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    root: PathBuf,
}

impl BackupCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists every directory under the root that holds at least one
    /// artifact, newest first. A missing root is an empty catalog.
    pub fn list(&self) -> Result<Vec<BackupEntry>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MigrateError::io(&self.root, e)),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MigrateError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(backup) = Self::describe(&path)? {
                backups.push(backup);
            }
        }

        backups.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));
        Ok(backups)
    }

    /// Looks up a backup by directory name.
    pub fn get(&self, name: &str) -> Result<Option<BackupEntry>> {
        validate_backup_name(name)?;
        let path = self.root.join(name);
        if !path.is_dir() {
            return Ok(None);
        }
        Self::describe(&path)
    }

    /// Deletes a backup directory and everything in it.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_backup_name(name)?;
        let path = self.root.join(name);
        fs::remove_dir_all(&path).map_err(|e| MigrateError::io(&path, e))?;
        tracing::info!("Removed backup {}", path.display());
        Ok(())
    }

    /// Keeps the newest `keep` backups and removes the rest. Returns the
    /// names removed.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for backup in self.list()?.into_iter().skip(keep) {
            self.remove(&backup.name)?;
            removed.push(backup.name);
        }
        Ok(removed)
    }

    fn describe(dir: &Path) -> Result<Option<BackupEntry>> {
        let mut files = Vec::new();
        collect_artifacts(dir, &mut files)?;
        if files.is_empty() {
            return Ok(None);
        }

        let mut databases = Vec::with_capacity(files.len());
        let mut size_bytes = 0;
        for file in &files {
            let meta = fs::metadata(file).map_err(|e| MigrateError::io(file, e))?;
            size_bytes += meta.len();
            if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                databases.push(database_from_stem(stem));
            }
        }
        databases.sort();

        let modified = fs::metadata(dir)
            .and_then(|m| m.modified())
            .map_err(|e| MigrateError::io(dir, e))?;

        Ok(Some(BackupEntry {
            name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: dir.to_path_buf(),
            databases,
            file_count: files.len(),
            size_bytes,
            created: DateTime::<Local>::from(modified),
        }))
    }
}

fn collect_artifacts(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| MigrateError::io(dir, e))? {
        let path = entry.map_err(|e| MigrateError::io(dir, e))?.path();
        if path.is_dir() {
            collect_artifacts(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}
