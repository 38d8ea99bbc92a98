mod backup;
mod backups;
mod config_cmd;
mod databases;
mod delete;
mod restore;
mod status;
mod sync_cmd;

pub use backup::BackupCommand;
pub use backups::BackupsCommand;
pub use config_cmd::ConfigCommand;
pub use databases::DatabasesCommand;
pub use delete::DeleteCommand;
pub use restore::RestoreCommand;
pub use status::StatusCommand;
pub use sync_cmd::SyncCommand;

use couchmigrate_core::{
    CouchClient, HttpStrategy, MigrateError, MigrationStrategy, OperationReport, ScriptStrategy,
};
use std::path::Path;

use crate::config::{Config, ConfigError, Server};

/// Creates a client for a configured server
pub fn client_for(config: &Config, server: Server) -> Result<CouchClient, CommandError> {
    let url = config.server_url(server)?;
    let connection = couchmigrate_core::ConnectionDescriptor::parse(url)?;
    Ok(CouchClient::with_timeouts(connection, config.timeouts.http()))
}

/// HTTP first, then the configured script if there is one
pub enum Strategy {
    Http(HttpStrategy<CouchClient>),
    WithScript(couchmigrate_core::Fallback<HttpStrategy<CouchClient>, ScriptStrategy>),
}

impl Strategy {
    pub fn for_server(config: &Config, server: Server) -> Result<Self, CommandError> {
        let client = client_for(config, server)?;
        let http = HttpStrategy::new(client.clone());

        Ok(match &config.script_path.value {
            Some(script) => {
                let (backup, restore) = config.timeouts.script();
                let script = ScriptStrategy::new(script.clone(), client.connection().clone())
                    .with_timeouts(backup, restore);
                Strategy::WithScript(couchmigrate_core::Fallback::new(http, script))
            }
            None => Strategy::Http(http),
        })
    }

    pub fn client(&self) -> &CouchClient {
        match self {
            Strategy::Http(http) => http.api(),
            Strategy::WithScript(chain) => chain.primary().api(),
        }
    }

    pub async fn export(&self, db: &str, dir: &Path) -> OperationReport {
        match self {
            Strategy::Http(s) => s.export(db, dir).await,
            Strategy::WithScript(s) => s.export(db, dir).await,
        }
    }

    pub async fn restore(&self, db: &str, artifact: &Path, clean: bool) -> OperationReport {
        match self {
            Strategy::Http(s) => s.restore(db, artifact, clean).await,
            Strategy::WithScript(s) => s.restore(db, artifact, clean).await,
        }
    }
}

/// Prints a per-database report line
pub fn print_report(db: &str, report: &OperationReport) {
    let mark = if report.success { "✓" } else { "✗" };
    println!("  {} {} - {}", mark, db, report.message);
}

/// Errors from commands
#[derive(Debug)]
pub enum CommandError {
    Config(ConfigError),
    Migrate(MigrateError),
    Io(std::io::Error),
    /// Invalid arguments or a refused precondition
    Invalid(String),
    /// Some of the requested work failed; the summary says how much
    Incomplete(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Config(e) => write!(f, "{}", e),
            CommandError::Migrate(e) => write!(f, "{}", e),
            CommandError::Io(e) => write!(f, "IO error: {}", e),
            CommandError::Invalid(msg) => write!(f, "{}", msg),
            CommandError::Incomplete(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<ConfigError> for CommandError {
    fn from(e: ConfigError) -> Self {
        CommandError::Config(e)
    }
}

impl From<MigrateError> for CommandError {
    fn from(e: MigrateError) -> Self {
        CommandError::Migrate(e)
    }
}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        CommandError::Io(e)
    }
}

/// Fails with "N of M <what>" unless every item succeeded
pub fn finish(succeeded: usize, total: usize, what: &str) -> Result<(), CommandError> {
    let summary = format!("{} of {} {}", succeeded, total, what);
    println!();
    if succeeded == total {
        println!("{}", summary);
        Ok(())
    } else {
        Err(CommandError::Incomplete(summary))
    }
}
