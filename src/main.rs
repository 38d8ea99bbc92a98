use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{
    BackupCommand, BackupsCommand, ConfigCommand, DatabasesCommand, DeleteCommand,
    RestoreCommand, StatusCommand, SyncCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "couchmigrate")]
#[command(version)]
#[command(about = "Back up, restore and sync CouchDB databases", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check connectivity to the configured servers
    Status(StatusCommand),

    /// List databases on a server
    Databases(DatabasesCommand),

    /// Back up databases
    Backup(BackupCommand),

    /// Restore databases from a backup
    Restore(RestoreCommand),

    /// Copy databases from one server to the other
    Sync(SyncCommand),

    /// Delete a database
    Delete(DeleteCommand),

    /// Manage stored backups
    Backups(BackupsCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "couchmigrate=info,couchmigrate_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Status(cmd)) => cmd.run(&config).await?,
        Some(Commands::Databases(cmd)) => cmd.run(&config).await?,
        Some(Commands::Backup(cmd)) => cmd.run(&config).await?,
        Some(Commands::Restore(cmd)) => cmd.run(&config).await?,
        Some(Commands::Sync(cmd)) => cmd.run(&config).await?,
        Some(Commands::Delete(cmd)) => cmd.run(&config).await?,
        Some(Commands::Backups(cmd)) => cmd.run(&config)?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_flags() {
        let cli = Cli::try_parse_from(["couchmigrate", "sync", "--new-only", "--reverse"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Sync(_))));

        assert!(Cli::try_parse_from(["couchmigrate", "sync", "orders", "--all"]).is_err());
    }

    #[test]
    fn test_parse_restore() {
        let cli = Cli::try_parse_from([
            "couchmigrate",
            "restore",
            "backups/nightly",
            "orders",
            "--clean",
            "--server",
            "source",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Restore(_))));
    }
}
