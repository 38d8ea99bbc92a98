//! Connectivity check for the configured servers.

use clap::Args;
use couchmigrate_core::{redact, CouchApi};

use super::{client_for, CommandError};
use crate::config::{Config, Server};

/// Check that the source and target servers are reachable
#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        println!("Server Status");
        println!("=============");
        println!();

        let mut reachable = 0;
        let mut configured = 0;
        for server in [Server::Source, Server::Target] {
            let Ok(url) = config.server_url(server) else {
                println!("{}: not configured (set {})", server, server.env_var());
                continue;
            };
            configured += 1;
            println!("{}: {}", server, redact(url));

            let client = client_for(config, server)?;
            match client.ping().await {
                Ok(()) => {
                    reachable += 1;
                    match client.list_databases().await {
                        Ok(dbs) => println!("  ✓ connected ({} databases)", dbs.len()),
                        Err(e) => println!("  ✓ connected (could not list databases: {})", e),
                    }
                }
                Err(e) => println!("  ✗ unreachable - {}", e),
            }
        }

        if configured == 0 {
            return Err(CommandError::Invalid(
                "No servers configured. Set SOURCE_COUCHDB_URL and TARGET_COUCHDB_URL".to_string(),
            ));
        }
        super::finish(reachable, configured, "servers reachable")
    }
}
