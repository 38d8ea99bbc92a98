//! Restore databases from backup artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use couchmigrate_core::snapshot::database_from_stem;
use couchmigrate_core::{locate_artifact, read_artifact};

use super::{finish, print_report, CommandError, Strategy};
use crate::config::{Config, Server};

/// Restore databases from a backup file or directory
#[derive(Debug, Args)]
pub struct RestoreCommand {
    /// Backup file, backup directory, or name of a backup in the backup directory
    path: PathBuf,

    /// Databases to restore (default: every artifact found)
    databases: Vec<String>,

    /// Server to restore into
    #[arg(long, value_enum, default_value = "target")]
    server: Server,

    /// Delete and recreate each database before restoring
    #[arg(long)]
    clean: bool,

    /// Restore artifacts that contain no documents
    #[arg(long)]
    allow_empty: bool,
}

impl RestoreCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let path = self.resolve_path(&config.backup_dir.value);
        let plan = self.plan(&path)?;
        if plan.is_empty() {
            return Err(CommandError::Invalid(format!(
                "No backup files found in {}",
                path.display()
            )));
        }

        let strategy = Strategy::for_server(config, self.server)?;

        println!(
            "Restoring {} databases to {} server{}",
            plan.len(),
            self.server,
            if self.clean { " (clean)" } else { "" }
        );
        println!();

        let mut succeeded = 0;
        for (db, artifact) in &plan {
            if !self.allow_empty {
                match read_artifact(artifact) {
                    Ok(parsed) if parsed.documents.is_empty() => {
                        println!(
                            "  ✗ {} - backup contains no documents (use --allow-empty to restore it)",
                            db
                        );
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        println!("  ✗ {} - {}", db, e);
                        continue;
                    }
                }
            }

            let report = strategy.restore(db, artifact, self.clean).await;
            if report.success {
                succeeded += 1;
            }
            print_report(db, &report);
        }

        finish(succeeded, plan.len(), "databases restored")
    }

    /// A bare name refers to a backup inside the backup directory
    fn resolve_path(&self, backup_dir: &Path) -> PathBuf {
        if self.path.exists() {
            return self.path.clone();
        }
        let named = backup_dir.join(&self.path);
        if named.exists() {
            named
        } else {
            self.path.clone()
        }
    }

    /// Pairs each database with the artifact to restore it from
    fn plan(&self, path: &Path) -> Result<Vec<(String, PathBuf)>, CommandError> {
        if path.is_file() {
            let db = match self.databases.as_slice() {
                [] => stem(path).ok_or_else(|| {
                    CommandError::Invalid(format!("Cannot infer a database name from {}", path.display()))
                })?,
                [db] => db.clone(),
                _ => {
                    return Err(CommandError::Invalid(
                        "A single backup file restores a single database".to_string(),
                    ))
                }
            };
            return Ok(vec![(db, path.to_path_buf())]);
        }

        if !path.is_dir() {
            return Err(CommandError::Invalid(format!(
                "Backup not found: {}",
                path.display()
            )));
        }

        if self.databases.is_empty() {
            return discover(path);
        }

        self.databases
            .iter()
            .map(|db| {
                locate_artifact(path, db)
                    .map(|artifact| (db.clone(), artifact))
                    .ok_or_else(|| {
                        CommandError::Invalid(format!(
                            "No backup of '{}' in {}",
                            db,
                            path.display()
                        ))
                    })
            })
            .collect()
    }
}

fn stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(database_from_stem)
}

/// Every artifact directly in `dir` or one level below, newest copy of each
/// database winning
fn discover(dir: &Path) -> Result<Vec<(String, PathBuf)>, CommandError> {
    let mut names = Vec::new();
    let mut push = |path: PathBuf| {
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            if let Some(db) = stem(&path) {
                if !names.contains(&db) {
                    names.push(db);
                }
            }
        }
    };

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            for inner in fs::read_dir(&path)? {
                push(inner?.path());
            }
        } else {
            push(path);
        }
    }

    names.sort();
    Ok(names
        .into_iter()
        .filter_map(|db| locate_artifact(dir, &db).map(|artifact| (db, artifact)))
        .collect())
}
