//! Interchangeable ways of running an export or a restore.
//!
//! Every strategy answers with an [`OperationReport`] rather than an error,
//! so a caller can try one and fall back to another without caring how
//! either failed.

mod http;
mod script;

use std::path::Path;

pub use http::HttpStrategy;
pub use script::ScriptStrategy;

/// Success flag plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub success: bool,
    pub message: String,
}

impl OperationReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A way of exporting a database to a directory and restoring it from an
/// artifact file.
#[allow(async_fn_in_trait)]
pub trait MigrationStrategy {
    fn name(&self) -> &str;

    /// Exports `db` into a new backup under `dir`.
    async fn export(&self, db: &str, dir: &Path) -> OperationReport;

    /// Restores `db` from the artifact at `artifact`.
    async fn restore(&self, db: &str, artifact: &Path, clean: bool) -> OperationReport;
}

/// Runs `primary`, and `secondary` only if the primary reports failure.
pub struct Fallback<P, S> {
    primary: P,
    secondary: S,
}

impl<P: MigrationStrategy, S: MigrationStrategy> Fallback<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn secondary(&self) -> &S {
        &self.secondary
    }

    fn engage(&self, operation: &str, db: &str, report: &OperationReport) {
        tracing::warn!(
            "{} of '{}' via {} failed, trying {}: {}",
            operation,
            db,
            self.primary.name(),
            self.secondary.name(),
            report.message
        );
    }
}

impl<P: MigrationStrategy, S: MigrationStrategy> MigrationStrategy for Fallback<P, S> {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn export(&self, db: &str, dir: &Path) -> OperationReport {
        let report = self.primary.export(db, dir).await;
        if report.success {
            return report;
        }
        self.engage("Backup", db, &report);
        self.secondary.export(db, dir).await
    }

    async fn restore(&self, db: &str, artifact: &Path, clean: bool) -> OperationReport {
        let report = self.primary.restore(db, artifact, clean).await;
        if report.success {
            return report;
        }
        self.engage("Restore", db, &report);
        self.secondary.restore(db, artifact, clean).await
    }
}
