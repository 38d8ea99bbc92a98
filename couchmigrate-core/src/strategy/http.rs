//! Export and restore over the CouchDB HTTP API.

use std::path::Path;

use super::{MigrationStrategy, OperationReport};
use crate::couch::CouchApi;
use crate::restore::{RestoreEngine, RestoreOutcome, RestoreRequest};
use crate::snapshot::{read_artifact, SnapshotWriter};

const MAX_LISTED_FAILURES: usize = 5;

/// Runs operations through a [`CouchApi`] implementation.
pub struct HttpStrategy<A> {
    api: A,
}

impl<A: CouchApi> HttpStrategy<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }
}

fn describe(db: &str, outcome: &RestoreOutcome) -> String {
    let mut parts = vec![format!("{} in '{}'", outcome.summary(), db)];

    if !outcome.failures.is_empty() {
        let listed: Vec<String> = outcome
            .failures
            .iter()
            .take(MAX_LISTED_FAILURES)
            .map(|f| format!("{}: {}", f.id, f.reason))
            .collect();
        let more = outcome.failures.len().saturating_sub(MAX_LISTED_FAILURES);
        if more > 0 {
            parts.push(format!("Errors: {}... and {} more", listed.join("; "), more));
        } else {
            parts.push(format!("Errors: {}", listed.join("; ")));
        }
    }
    if !outcome.inconsistent.is_empty() {
        parts.push(format!(
            "{} documents unaccounted for in the bulk response",
            outcome.inconsistent.len()
        ));
    }
    parts.extend(outcome.warnings.iter().cloned());
    parts.join(" | ")
}

impl<A: CouchApi> MigrationStrategy for HttpStrategy<A> {
    fn name(&self) -> &str {
        "http"
    }

    async fn export(&self, db: &str, dir: &Path) -> OperationReport {
        match SnapshotWriter::new(dir).export(&self.api, db).await {
            Ok(artifact) => OperationReport::ok(format!(
                "Backup completed: {} ({} bytes, {} documents)",
                artifact.path.display(),
                artifact.size_bytes,
                artifact.document_count
            )),
            Err(e) => OperationReport::failed(format!("Backup of '{}' failed: {}", db, e)),
        }
    }

    async fn restore(&self, db: &str, artifact: &Path, clean: bool) -> OperationReport {
        let parsed = match read_artifact(artifact) {
            Ok(parsed) => parsed,
            Err(e) => return OperationReport::failed(format!("Restore of '{}' failed: {}", db, e)),
        };

        let request = RestoreRequest::new(db, parsed.documents).clean(clean);
        match RestoreEngine::new(&self.api).restore(request).await {
            Ok(outcome) => OperationReport::ok(describe(db, &outcome)),
            Err(e) => OperationReport::failed(format!("Restore of '{}' failed: {}", db, e)),
        }
    }
}
