use clap::Args;
use couchmigrate_core::CouchApi;

use super::{client_for, CommandError};
use crate::config::{Config, Server};

/// Delete a database
#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Database to delete
    database: String,

    /// Server holding the database
    #[arg(long, value_enum, default_value = "target")]
    server: Server,

    /// Confirm the deletion
    #[arg(long)]
    yes: bool,
}

impl DeleteCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        if !self.yes {
            return Err(CommandError::Invalid(format!(
                "Deleting '{}' cannot be undone. Re-run with --yes to confirm",
                self.database
            )));
        }

        let client = client_for(config, self.server)?;
        if !client.database_exists(&self.database).await? {
            return Err(CommandError::Invalid(format!(
                "Database '{}' does not exist",
                self.database
            )));
        }

        client.delete_database(&self.database).await?;
        tracing::info!("Deleted database '{}' on {} server", self.database, self.server);
        println!("Deleted database '{}'", self.database);
        Ok(())
    }
}
