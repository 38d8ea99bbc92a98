//! Manage stored backups.

use clap::{Args, Subcommand};
use couchmigrate_core::BackupCatalog;

use super::CommandError;
use crate::config::Config;

/// Manage stored backups
#[derive(Debug, Args)]
pub struct BackupsCommand {
    #[command(subcommand)]
    command: BackupsSubcommand,
}

#[derive(Debug, Subcommand)]
enum BackupsSubcommand {
    /// List backups, newest first
    List,

    /// Remove a backup
    Remove {
        /// Backup directory name
        name: String,

        /// Confirm the removal
        #[arg(long)]
        yes: bool,
    },

    /// Remove all but the newest backups
    Prune {
        /// Number of backups to keep
        #[arg(long, default_value_t = 5)]
        keep: usize,

        /// Confirm the removal
        #[arg(long)]
        yes: bool,
    },
}

impl BackupsCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let catalog = BackupCatalog::new(&config.backup_dir.value);

        match &self.command {
            BackupsSubcommand::List => {
                let backups = catalog.list()?;
                if backups.is_empty() {
                    println!("No backups in {}", catalog.root().display());
                    return Ok(());
                }

                println!(
                    "{:<32} {:<20} {:>6} {:>10}  DATABASES",
                    "NAME", "CREATED", "FILES", "SIZE MB"
                );
                for backup in &backups {
                    println!(
                        "{:<32} {:<20} {:>6} {:>10.2}  {}",
                        backup.name,
                        backup.created.format("%Y-%m-%d %H:%M:%S"),
                        backup.file_count,
                        backup.size_mb(),
                        backup.databases.join(", ")
                    );
                }
                Ok(())
            }

            BackupsSubcommand::Remove { name, yes } => {
                if catalog.get(name)?.is_none() {
                    return Err(CommandError::Invalid(format!("Backup '{}' not found", name)));
                }
                if !yes {
                    return Err(CommandError::Invalid(format!(
                        "Removing '{}' cannot be undone. Re-run with --yes to confirm",
                        name
                    )));
                }
                catalog.remove(name)?;
                println!("Removed backup '{}'", name);
                Ok(())
            }

            BackupsSubcommand::Prune { keep, yes } => {
                if !yes {
                    let count = catalog.list()?.len().saturating_sub(*keep);
                    println!(
                        "{} backups would be removed. Re-run with --yes to confirm",
                        count
                    );
                    return Ok(());
                }
                let removed = catalog.prune(*keep)?;
                for name in &removed {
                    println!("Removed backup '{}'", name);
                }
                println!("{} backups removed", removed.len());
                Ok(())
            }
        }
    }
}
