//! One-directional sync: export from a source server, restore into a target.
//!
//! Each database goes through a private scratch directory that is removed
//! when the run ends, whether it succeeded or not.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::couch::CouchApi;
use crate::error::{MigrateError, Result};
use crate::restore::{CancelFlag, RestoreEngine, RestoreOutcome, RestoreRequest};
use crate::snapshot::{read_artifact, BackupArtifact, SnapshotWriter, TIMESTAMP_FORMAT};

/// Prefix of scratch directories.
pub const SCRATCH_PREFIX: &str = "temp_sync_";

/// Which databases a sync covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSelection {
    Selected(Vec<String>),
    /// Every database on the source.
    All,
    /// Source databases that do not exist on the target.
    NewOnly,
}

impl SyncSelection {
    /// Resolves the selection into database names.
    pub async fn resolve<S: CouchApi, T: CouchApi>(
        &self,
        source: &S,
        target: &T,
    ) -> Result<Vec<String>> {
        match self {
            SyncSelection::Selected(names) => Ok(names.clone()),
            SyncSelection::All => source.list_databases().await,
            SyncSelection::NewOnly => {
                let existing = target.list_databases().await?;
                Ok(source
                    .list_databases()
                    .await?
                    .into_iter()
                    .filter(|db| !existing.contains(db))
                    .collect())
            }
        }
    }
}

/// Result of syncing one database.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// The scratch artifact the restore was fed from. Already deleted.
    pub artifact: BackupArtifact,
    pub restore: RestoreOutcome,
}

/// Removes the scratch directory when dropped.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(root: &Path) -> Result<Self> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}{}_{}",
            SCRATCH_PREFIX,
            Local::now().format(TIMESTAMP_FORMAT),
            &suffix[..8]
        );
        let path = root.join(name);
        fs::create_dir_all(&path).map_err(|e| MigrateError::io(&path, e))?;
        tracing::debug!("Created scratch directory {}", path.display());
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!("Removed scratch directory {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove scratch directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Moves databases from a source server to a target server.
pub struct SyncOrchestrator<'a, S, T> {
    source: &'a S,
    target: &'a T,
    scratch_root: PathBuf,
    cancel: Option<CancelFlag>,
}

impl<'a, S: CouchApi, T: CouchApi> SyncOrchestrator<'a, S, T> {
    pub fn new(source: &'a S, target: &'a T, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            source,
            target,
            scratch_root: scratch_root.into(),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Syncs one database. An export failure is reported as
    /// [`MigrateError::BackupFailed`] and the target is left untouched.
    pub async fn sync_database(&self, db: &str, clean: bool) -> Result<SyncOutcome> {
        tracing::info!("Syncing '{}'{}", db, if clean { " (clean)" } else { "" });

        let scratch = ScratchDir::create(&self.scratch_root)?;
        let writer = SnapshotWriter::new(scratch.path());

        let artifact = writer
            .export(self.source, db)
            .await
            .map_err(|e| MigrateError::BackupFailed(Box::new(e)))?;

        let documents = read_artifact(&artifact.path)?.documents;

        let mut request = RestoreRequest::new(db, documents).clean(clean);
        if let Some(cancel) = &self.cancel {
            request = request.with_cancel(cancel.clone());
        }
        let restore = RestoreEngine::new(self.target).restore(request).await?;

        tracing::info!("Sync of '{}' finished: {}", db, restore.summary());
        Ok(SyncOutcome { artifact, restore })
    }

    /// Syncs databases one after another. A failure on one database does
    /// not stop the others.
    pub async fn sync_databases(
        &self,
        dbs: &[String],
        clean: bool,
    ) -> Vec<(String, Result<SyncOutcome>)> {
        let mut results = Vec::with_capacity(dbs.len());
        for db in dbs {
            if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                results.push((db.clone(), Err(MigrateError::Cancelled)));
                continue;
            }
            let result = self.sync_database(db, clean).await;
            if let Err(e) = &result {
                tracing::warn!("Sync of '{}' failed: {}", db, e);
            }
            results.push((db.clone(), result));
        }
        results
    }
}
