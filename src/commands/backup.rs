//! Export databases into the backup directory.

use clap::Args;
use couchmigrate_core::CouchApi;

use super::{finish, print_report, CommandError, Strategy};
use crate::config::{Config, Server};

/// Back up databases
#[derive(Debug, Args)]
pub struct BackupCommand {
    /// Databases to back up
    databases: Vec<String>,

    /// Back up every database on the server
    #[arg(long, conflicts_with = "databases")]
    all: bool,

    /// Server to back up from
    #[arg(long, value_enum, default_value = "source")]
    server: Server,

    /// Store the backup under this name inside the backup directory
    #[arg(long)]
    name: Option<String>,
}

impl BackupCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let strategy = Strategy::for_server(config, self.server)?;

        let databases = if self.all {
            strategy.client().list_databases().await?
        } else {
            self.databases.clone()
        };
        if databases.is_empty() {
            return Err(CommandError::Invalid(
                "No databases given. Name databases or pass --all".to_string(),
            ));
        }

        let mut dir = config.backup_dir.value.clone();
        if let Some(name) = &self.name {
            couchmigrate_core::snapshot::validate_backup_name(name)?;
            dir = dir.join(name);
        }

        println!("Backing up {} databases to {}", databases.len(), dir.display());
        println!();

        let mut succeeded = 0;
        for db in &databases {
            let report = strategy.export(db, &dir).await;
            if report.success {
                succeeded += 1;
            }
            print_report(db, &report);
        }

        finish(succeeded, databases.len(), "databases backed up")
    }
}
