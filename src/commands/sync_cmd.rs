//! Sync databases from one server to the other.

use clap::Args;
use couchmigrate_core::{CancelFlag, SyncOrchestrator, SyncSelection};

use super::{client_for, finish, CommandError};
use crate::config::{Config, Server};

/// Copy databases from the source server to the target server
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Databases to sync
    databases: Vec<String>,

    /// Sync every database on the source
    #[arg(long, conflicts_with_all = ["databases", "new_only"])]
    all: bool,

    /// Sync only databases missing on the target
    #[arg(long, conflicts_with = "databases")]
    new_only: bool,

    /// Sync from target to source instead
    #[arg(long)]
    reverse: bool,

    /// Delete and recreate each database on the receiving side first
    #[arg(long)]
    clean: bool,

    /// Confirm a clean sync
    #[arg(long)]
    yes: bool,
}

impl SyncCommand {
    fn selection(&self) -> Result<SyncSelection, CommandError> {
        if self.all {
            Ok(SyncSelection::All)
        } else if self.new_only {
            Ok(SyncSelection::NewOnly)
        } else if self.databases.is_empty() {
            Err(CommandError::Invalid(
                "No databases given. Name databases or pass --all or --new-only".to_string(),
            ))
        } else {
            Ok(SyncSelection::Selected(self.databases.clone()))
        }
    }

    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        if self.clean && !self.yes {
            return Err(CommandError::Invalid(
                "A clean sync deletes the receiving databases first. Re-run with --yes to confirm"
                    .to_string(),
            ));
        }
        let selection = self.selection()?;

        let (from, to) = if self.reverse {
            (Server::Target, Server::Source)
        } else {
            (Server::Source, Server::Target)
        };
        let source = client_for(config, from)?;
        let target = client_for(config, to)?;

        let databases = selection.resolve(&source, &target).await?;
        if databases.is_empty() {
            println!("Nothing to sync.");
            return Ok(());
        }

        let cancel = CancelFlag::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping after the current step");
                on_interrupt.cancel();
            }
        });

        println!(
            "Syncing {} databases from {} to {}{}",
            databases.len(),
            from,
            to,
            if self.clean { " (clean)" } else { "" }
        );
        println!();

        let orchestrator = SyncOrchestrator::new(&source, &target, &config.backup_dir.value)
            .with_cancel(cancel);
        let results = orchestrator.sync_databases(&databases, self.clean).await;

        let mut succeeded = 0;
        for (db, result) in &results {
            match result {
                Ok(outcome) if outcome.restore.is_complete() => {
                    succeeded += 1;
                    println!("  ✓ {} - {}", db, outcome.restore.summary());
                }
                Ok(outcome) => {
                    println!("  ✗ {} - {}", db, outcome.restore.summary());
                    for failure in outcome.restore.failures.iter().take(5) {
                        println!("      {}: {}", failure.id, failure.reason);
                    }
                }
                Err(e) => println!("  ✗ {} - {}", db, e),
            }
            if let Ok(outcome) = result {
                for warning in &outcome.restore.warnings {
                    println!("      warning: {}", warning);
                }
            }
        }

        finish(succeeded, results.len(), "databases synced")
    }
}
