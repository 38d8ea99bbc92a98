//! Export and restore by shelling out to a legacy backup script.
//!
//! The script is invoked as
//! `bash <script> -b|-r -H host -P port -u user -p password -d db -o|-i dir [-c]`
//! with `N` answered to its interactive prompts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{MigrationStrategy, OperationReport};
use crate::connection::ConnectionDescriptor;
use crate::error::{MigrateError, Result};
use crate::snapshot::locate_artifact;

const PROMPT_ANSWERS: &[u8] = b"N\nN\n";

/// Runs the legacy shell script against one server.
#[derive(Debug, Clone)]
pub struct ScriptStrategy {
    script: PathBuf,
    connection: ConnectionDescriptor,
    backup_timeout: Duration,
    restore_timeout: Duration,
}

struct ScriptOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl ScriptOutput {
    fn combined(&self) -> String {
        format!("STDOUT:\n{}\n\nSTDERR:\n{}", self.stdout.trim_end(), self.stderr.trim_end())
    }
}

impl ScriptStrategy {
    pub fn new(script: impl Into<PathBuf>, connection: ConnectionDescriptor) -> Self {
        Self {
            script: script.into(),
            connection,
            backup_timeout: Duration::from_secs(5 * 60),
            restore_timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_timeouts(mut self, backup: Duration, restore: Duration) -> Self {
        self.backup_timeout = backup;
        self.restore_timeout = restore;
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Arguments after the script path, in the order the script expects.
    fn arguments(&self, mode: &str, db: &str, dir_flag: &str, dir: &Path, clean: bool) -> Vec<String> {
        let (user, password) = self.connection.credentials().unwrap_or(("", ""));
        let mut args = vec![
            mode.to_string(),
            "-H".to_string(),
            self.connection.host.clone(),
            "-P".to_string(),
            self.connection.port.to_string(),
            "-u".to_string(),
            user.to_string(),
            "-p".to_string(),
            password.to_string(),
            "-d".to_string(),
            db.to_string(),
            dir_flag.to_string(),
            dir.display().to_string(),
        ];
        if clean {
            args.push("-c".to_string());
        }
        args
    }

    async fn run(&self, args: Vec<String>, limit: Duration) -> Result<ScriptOutput> {
        if !self.script.is_file() {
            return Err(MigrateError::Script(format!(
                "script not found at {}",
                self.script.display()
            )));
        }

        let shown: Vec<&str> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| if i > 0 && args[i - 1] == "-p" { "****" } else { arg.as_str() })
            .collect();
        tracing::info!("Running bash {} {}", self.script.display(), shown.join(" "));

        let mut child = Command::new("bash")
            .arg(&self.script)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MigrateError::Script(format!("failed to start script: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A script that never reads its prompts closes stdin early.
            let _ = stdin.write_all(PROMPT_ANSWERS).await;
        }

        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| MigrateError::Script(format!("timed out after {} seconds", limit.as_secs())))?
            .map_err(|e| MigrateError::Script(format!("failed to wait for script: {}", e)))?;

        let result = ScriptOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::info!("Script exited with code {:?}", result.code);
        Ok(result)
    }
}

impl MigrationStrategy for ScriptStrategy {
    fn name(&self) -> &str {
        "script"
    }

    async fn export(&self, db: &str, dir: &Path) -> OperationReport {
        let args = self.arguments("-b", db, "-o", dir, false);
        let output = match self.run(args, self.backup_timeout).await {
            Ok(output) => output,
            Err(e) => return OperationReport::failed(format!("Backup of '{}' failed: {}", db, e)),
        };

        if !output.success {
            return OperationReport::failed(format!(
                "Backup failed (exit code {:?}):\n{}",
                output.code,
                output.combined()
            ));
        }

        match locate_artifact(dir, db) {
            Some(path) => {
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                OperationReport::ok(format!("Backup completed: {} ({} bytes)", path.display(), size))
            }
            None => OperationReport::failed(format!(
                "Backup script ran but no file created.\n{}",
                output.combined()
            )),
        }
    }

    async fn restore(&self, db: &str, artifact: &Path, clean: bool) -> OperationReport {
        if !artifact.is_file() {
            return OperationReport::failed(format!(
                "Backup file not found: {}",
                artifact.display()
            ));
        }
        let dir = artifact.parent().unwrap_or_else(|| Path::new("."));
        let args = self.arguments("-r", db, "-i", dir, clean);

        match self.run(args, self.restore_timeout).await {
            Ok(output) if output.success => {
                OperationReport::ok(format!("Database '{}' restored successfully", db))
            }
            Ok(output) => OperationReport::failed(format!(
                "Restore failed (exit code {:?}):\n{}",
                output.code,
                output.combined()
            )),
            Err(e) => OperationReport::failed(format!("Restore of '{}' failed: {}", db, e)),
        }
    }
}
