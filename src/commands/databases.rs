//! Database overview for one server.

use clap::Args;
use couchmigrate_core::CouchApi;

use super::{client_for, CommandError};
use crate::config::{Config, Server};

/// List databases with document counts and sizes
#[derive(Debug, Args)]
pub struct DatabasesCommand {
    /// Server to list
    #[arg(long, value_enum, default_value = "source")]
    server: Server,
}

impl DatabasesCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let client = client_for(config, self.server)?;
        let names = client.list_databases().await?;

        if names.is_empty() {
            println!("No databases on {} server.", self.server);
            return Ok(());
        }

        println!("{:<40} {:>10} {:>10} {:>10}", "DATABASE", "DOCS", "DELETED", "SIZE MB");
        for name in &names {
            match client.database_info(name).await {
                Ok(Some(info)) => println!(
                    "{:<40} {:>10} {:>10} {:>10.2}",
                    name,
                    info.doc_count,
                    info.doc_del_count,
                    info.storage_bytes() as f64 / (1024.0 * 1024.0)
                ),
                Ok(None) => println!("{:<40} {:>10}", name, "gone"),
                Err(e) => println!("{:<40} error: {}", name, e),
            }
        }
        println!();
        println!("{} databases on {} server", names.len(), self.server);
        Ok(())
    }
}
