//! Restoring a document set into a target database.
//!
//! A restore runs in fixed stages: provision the database, write design
//! documents one at a time, write every regular document in one bulk
//! request, then compare the stored count with what was written.
//! Per-document rejections are collected on the [`RestoreOutcome`]; only
//! provisioning and transport failures abort the run.
//!
//! Two restores into the same database at once are not coordinated. The
//! caller must serialize them.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::couch::{BulkRequest, BulkResponse, CouchApi, PutOutcome};
use crate::document::{classify, sanitize, Document};
use crate::error::{MigrateError, Result};

/// Progress of a restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    NotStarted,
    Provisioned,
    DesignDocsRestored,
    BulkRestored,
    Verified,
    Done,
    Failed,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStage::NotStarted => "not started",
            RestoreStage::Provisioned => "provisioned",
            RestoreStage::DesignDocsRestored => "design documents restored",
            RestoreStage::BulkRestored => "bulk restored",
            RestoreStage::Verified => "verified",
            RestoreStage::Done => "done",
            RestoreStage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Caller-owned cancellation signal, checked between design documents.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a restore needs, passed explicitly.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub database: String,
    pub documents: Vec<Document>,
    /// Delete and recreate the database before writing.
    pub clean: bool,
    pub cancel: Option<CancelFlag>,
}

impl RestoreRequest {
    pub fn new(database: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            database: database.into(),
            documents,
            clean: false,
            cancel: None,
        }
    }

    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }
}

/// A document the target refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub id: String,
    pub reason: String,
}

/// Result of comparing the stored document count with the upserted count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Matched(u64),
    Mismatch { expected: u64, actual: u64 },
    /// The count could not be read; the restore itself still stands.
    Unavailable(String),
}

/// What a completed restore did.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOutcome {
    pub database: String,
    pub attempted: usize,
    pub upserted: usize,
    pub failures: Vec<DocumentFailure>,
    /// Ids sent in the bulk request that the response neither accepted nor
    /// rejected.
    pub inconsistent: Vec<String>,
    pub warnings: Vec<String>,
    pub verification: Verification,
    pub stage: RestoreStage,
}

impl RestoreOutcome {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// True when every document was written and nothing was left unaccounted.
    pub fn is_complete(&self) -> bool {
        self.upserted == self.attempted && self.failures.is_empty() && self.inconsistent.is_empty()
    }

    pub fn summary(&self) -> String {
        format!("{} of {} documents restored", self.upserted, self.attempted)
    }
}

#[derive(Default)]
struct Tally {
    upserted: usize,
    failures: Vec<DocumentFailure>,
    inconsistent: Vec<String>,
    warnings: Vec<String>,
}

/// Restores document sets through a [`CouchApi`].
pub struct RestoreEngine<'a, A> {
    api: &'a A,
    stage: RestoreStage,
}

impl<'a, A: CouchApi> RestoreEngine<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            stage: RestoreStage::NotStarted,
        }
    }

    /// The stage the last run reached; `Failed` if it aborted.
    pub fn stage(&self) -> RestoreStage {
        self.stage
    }

    pub async fn restore(&mut self, request: RestoreRequest) -> Result<RestoreOutcome> {
        self.stage = RestoreStage::NotStarted;
        match self.run(&request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(
                    "Restore of '{}' aborted after stage '{}': {}",
                    request.database,
                    self.stage,
                    e
                );
                self.stage = RestoreStage::Failed;
                Err(e)
            }
        }
    }

    async fn run(&mut self, request: &RestoreRequest) -> Result<RestoreOutcome> {
        let db = request.database.as_str();
        tracing::info!(
            "Restoring {} documents into '{}'{}",
            request.documents.len(),
            db,
            if request.clean { " (clean)" } else { "" }
        );

        self.provision(db, request.clean).await?;
        self.advance(RestoreStage::Provisioned);

        let classified = classify(&request.documents);
        let mut tally = Tally::default();

        for doc in &classified.design {
            if request.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            self.restore_design_doc(db, doc, &mut tally).await?;
        }
        self.advance(RestoreStage::DesignDocsRestored);

        if request.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        if !classified.regular.is_empty() {
            self.restore_regular_docs(db, &classified.regular, &mut tally)
                .await?;
        }
        self.advance(RestoreStage::BulkRestored);

        let verification = self.verify(db, tally.upserted).await;
        if let Verification::Mismatch { expected, actual } = verification {
            tally.warnings.push(format!(
                "Document count mismatch in '{}': expected {}, found {}",
                db, expected, actual
            ));
        }
        self.advance(RestoreStage::Verified);

        let outcome = RestoreOutcome {
            database: db.to_string(),
            attempted: request.documents.len(),
            upserted: tally.upserted,
            failures: tally.failures,
            inconsistent: tally.inconsistent,
            warnings: tally.warnings,
            verification,
            stage: RestoreStage::Done,
        };
        self.advance(RestoreStage::Done);

        tracing::info!("Restore of '{}' finished: {}", db, outcome.summary());
        Ok(outcome)
    }

    fn advance(&mut self, stage: RestoreStage) {
        tracing::debug!("Restore stage: {}", stage);
        self.stage = stage;
    }

    async fn provision(&self, db: &str, clean: bool) -> Result<()> {
        let exists = self.api.database_exists(db).await?;

        if clean && exists {
            tracing::info!("Deleting existing database '{}'", db);
            self.api.delete_database(db).await?;
        }
        if clean || !exists {
            tracing::info!("Creating database '{}'", db);
            self.api.create_database(db).await?;
        }
        Ok(())
    }

    /// Writes one design document without its `_rev`. If the id is taken,
    /// retries once with the target's current revision.
    async fn restore_design_doc(&self, db: &str, doc: &Document, tally: &mut Tally) -> Result<()> {
        let id = doc.id().unwrap_or_default().to_string();
        let mut body = doc.without_rev();

        let first = match self.api.put_document(db, &body).await {
            Ok(outcome) => outcome,
            Err(e) => {
                record_failure(tally, &id, e.to_string());
                return Ok(());
            }
        };

        let outcome = match first {
            PutOutcome::Conflict => {
                tracing::debug!("Design document {} exists, retrying with current revision", id);
                match self.api.current_revision(db, &id).await {
                    Ok(Some(rev)) => {
                        body.set_rev(rev);
                        match self.api.put_document(db, &body).await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                record_failure(tally, &id, e.to_string());
                                return Ok(());
                            }
                        }
                    }
                    Ok(None) => PutOutcome::Conflict,
                    Err(e) => {
                        record_failure(tally, &id, e.to_string());
                        return Ok(());
                    }
                }
            }
            other => other,
        };

        match outcome {
            PutOutcome::Stored { .. } => {
                tracing::debug!("Restored design document {}", id);
                tally.upserted += 1;
            }
            PutOutcome::Conflict => record_failure(tally, &id, "conflict".to_string()),
            PutOutcome::Rejected { status, reason } => {
                record_failure(tally, &id, format!("HTTP {}: {}", status, reason))
            }
        }
        Ok(())
    }

    async fn restore_regular_docs(
        &self,
        db: &str,
        docs: &[&Document],
        tally: &mut Tally,
    ) -> Result<()> {
        let sanitized: Vec<Document> = docs.iter().map(|doc| sanitize(doc)).collect();
        let request = BulkRequest {
            new_edits: false,
            docs: &sanitized,
        };

        tracing::info!("Bulk restoring {} documents into '{}'", sanitized.len(), db);
        let response = self.api.bulk_docs(db, &request).await?;

        let results = match response {
            BulkResponse::Results(results) => results,
            BulkResponse::Unparseable(body) => {
                let message = format!(
                    "Unreadable bulk response from '{}', assuming {} documents stored: {}",
                    db,
                    sanitized.len(),
                    truncate(&body, 200)
                );
                tracing::warn!("{}", message);
                tally.warnings.push(message);
                tally.upserted += sanitized.len();
                return Ok(());
            }
        };

        // With new_edits=false CouchDB reports only failures; an empty array
        // means everything was stored.
        if results.is_empty() {
            tally.upserted += sanitized.len();
            return Ok(());
        }

        let mut seen = HashSet::new();
        for result in &results {
            let id = result.id.clone().unwrap_or_default();
            if let Some(error) = &result.error {
                let reason = match &result.reason {
                    Some(reason) => format!("{} ({})", error, reason),
                    None => error.clone(),
                };
                record_failure(tally, &id, reason);
                seen.insert(id);
            } else if result.ok == Some(true) || result.rev.is_some() {
                tally.upserted += 1;
                seen.insert(id);
            }
        }

        for doc in &sanitized {
            if let Some(id) = doc.id() {
                if !seen.contains(id) {
                    tally.inconsistent.push(id.to_string());
                }
            }
        }
        if !tally.inconsistent.is_empty() {
            tracing::warn!(
                "{} documents missing from the bulk response for '{}'",
                tally.inconsistent.len(),
                db
            );
        }
        Ok(())
    }

    async fn verify(&self, db: &str, expected: usize) -> Verification {
        let expected = expected as u64;
        match self.api.database_info(db).await {
            Ok(Some(info)) if info.doc_count == expected => Verification::Matched(expected),
            Ok(Some(info)) => {
                tracing::warn!(
                    "Verification of '{}': expected {} documents, found {}",
                    db,
                    expected,
                    info.doc_count
                );
                Verification::Mismatch {
                    expected,
                    actual: info.doc_count,
                }
            }
            Ok(None) => Verification::Unavailable(format!("database '{}' not found", db)),
            Err(e) => {
                tracing::warn!("Could not verify '{}': {}", db, e);
                Verification::Unavailable(e.to_string())
            }
        }
    }
}

fn record_failure(tally: &mut Tally, id: &str, reason: String) {
    tracing::warn!("Failed to restore {}: {}", id, reason);
    tally.failures.push(DocumentFailure {
        id: id.to_string(),
        reason,
    });
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::couch::{BulkResult, DatabaseInfo};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[derive(Default)]
    struct State {
        exists: bool,
        fail_create: bool,
        calls: Vec<String>,
        put_outcomes: VecDeque<PutOutcome>,
        puts: Vec<Document>,
        current_rev: Option<String>,
        bulk_response: Option<BulkResponse>,
        bulk_docs: Vec<Document>,
        doc_count: u64,
    }

    #[derive(Default)]
    struct MockCouch {
        state: Mutex<State>,
    }

    impl MockCouch {
        fn with(f: impl FnOnce(&mut State)) -> Self {
            let mock = Self::default();
            f(&mut mock.state.lock().unwrap());
            mock
        }

        fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        fn log(&self, call: &str) {
            self.state.lock().unwrap().calls.push(call.to_string());
        }
    }

    impl CouchApi for MockCouch {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn list_databases(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn database_info(&self, db: &str) -> Result<Option<DatabaseInfo>> {
            self.log("info");
            Ok(Some(DatabaseInfo {
                db_name: db.to_string(),
                doc_count: self.state.lock().unwrap().doc_count,
                ..Default::default()
            }))
        }

        async fn database_exists(&self, _db: &str) -> Result<bool> {
            self.log("head");
            Ok(self.state.lock().unwrap().exists)
        }

        async fn create_database(&self, db: &str) -> Result<()> {
            self.log("create");
            if self.state.lock().unwrap().fail_create {
                return Err(MigrateError::Provisioning {
                    database: db.to_string(),
                    status: 401,
                    message: "unauthorized".to_string(),
                });
            }
            Ok(())
        }

        async fn delete_database(&self, _db: &str) -> Result<()> {
            self.log("delete");
            Ok(())
        }

        async fn fetch_all_docs(&self, _db: &str) -> Result<Vec<Document>> {
            Ok(Vec::new())
        }

        async fn put_document(&self, _db: &str, doc: &Document) -> Result<PutOutcome> {
            self.log("put");
            let mut state = self.state.lock().unwrap();
            state.puts.push(doc.clone());
            Ok(state
                .put_outcomes
                .pop_front()
                .unwrap_or(PutOutcome::Stored { rev: None }))
        }

        async fn current_revision(&self, _db: &str, _id: &str) -> Result<Option<String>> {
            self.log("get");
            Ok(self.state.lock().unwrap().current_rev.clone())
        }

        async fn bulk_docs(&self, _db: &str, request: &BulkRequest<'_>) -> Result<BulkResponse> {
            self.log("bulk");
            let mut state = self.state.lock().unwrap();
            state.bulk_docs = request.docs.to_vec();
            Ok(state
                .bulk_response
                .clone()
                .unwrap_or(BulkResponse::Results(Vec::new())))
        }
    }

    fn regular_docs(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| doc(json!({"_id": format!("doc{}", i), "_rev": "1-a", "n": i})))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_bulk_response_counts_all_as_upserted() {
        let mock = MockCouch::with(|s| s.doc_count = 5);
        let mut engine = RestoreEngine::new(&mock);

        let outcome = engine
            .restore(RestoreRequest::new("orders", regular_docs(5)))
            .await
            .unwrap();

        assert_eq!(outcome.attempted, 5);
        assert_eq!(outcome.upserted, 5);
        assert_eq!(outcome.failed(), 0);
        assert!(outcome.inconsistent.is_empty());
        assert_eq!(outcome.verification, Verification::Matched(5));
        assert_eq!(outcome.summary(), "5 of 5 documents restored");
        assert!(outcome.is_complete());
        assert_eq!(engine.stage(), RestoreStage::Done);
    }

    #[tokio::test]
    async fn test_design_doc_conflict_retries_once_with_current_rev() {
        let mock = MockCouch::with(|s| {
            s.exists = true;
            s.current_rev = Some("4-current".to_string());
            s.put_outcomes = VecDeque::from([
                PutOutcome::Conflict,
                PutOutcome::Stored {
                    rev: Some("5-new".to_string()),
                },
            ]);
            s.doc_count = 1;
        });
        let docs = vec![doc(json!({"_id": "_design/views", "_rev": "2-old", "views": {}}))];

        let outcome = RestoreEngine::new(&mock)
            .restore(RestoreRequest::new("orders", docs))
            .await
            .unwrap();

        assert_eq!(outcome.upserted, 1);
        assert_eq!(mock.calls(), vec!["head", "put", "get", "put", "info"]);

        let state = mock.state.lock().unwrap();
        assert_eq!(state.puts[0].rev(), None);
        assert_eq!(state.puts[1].rev(), Some("4-current"));
    }

    #[tokio::test]
    async fn test_design_doc_second_failure_is_recorded() {
        let mock = MockCouch::with(|s| {
            s.current_rev = Some("4-current".to_string());
            s.put_outcomes = VecDeque::from([PutOutcome::Conflict, PutOutcome::Conflict]);
        });
        let docs = vec![doc(json!({"_id": "_design/views"}))];

        let outcome = RestoreEngine::new(&mock)
            .restore(RestoreRequest::new("orders", docs))
            .await
            .unwrap();

        assert_eq!(outcome.upserted, 0);
        assert_eq!(
            outcome.failures,
            vec![DocumentFailure {
                id: "_design/views".to_string(),
                reason: "conflict".to_string()
            }]
        );
        assert_eq!(mock.calls().iter().filter(|c| *c == "put").count(), 2);
    }

    #[tokio::test]
    async fn test_design_doc_rejection_is_not_retried() {
        let mock = MockCouch::with(|s| {
            s.put_outcomes = VecDeque::from([PutOutcome::Rejected {
                status: 403,
                reason: "forbidden".to_string(),
            }]);
        });
        let docs = vec![doc(json!({"_id": "_design/auth"})), regular_docs(1).remove(0)];

        let outcome = RestoreEngine::new(&mock)
            .restore(RestoreRequest::new("orders", docs))
            .await
            .unwrap();

        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.upserted, 1);
        assert!(outcome.failures[0].reason.contains("403"));
        assert!(!mock.calls().contains(&"get".to_string()));
    }

    #[tokio::test]
    async fn test_bulk_errors_and_inconsistent_ids() {
        let mock = MockCouch::with(|s| {
            s.bulk_response = Some(BulkResponse::Results(vec![
                BulkResult {
                    id: Some("doc0".to_string()),
                    ok: Some(true),
                    rev: Some("1-a".to_string()),
                    ..Default::default()
                },
                BulkResult {
                    id: Some("doc1".to_string()),
                    error: Some("forbidden".to_string()),
                    reason: Some("read only".to_string()),
                    ..Default::default()
                },
            ]));
            s.doc_count = 1;
        });

        let outcome = RestoreEngine::new(&mock)
            .restore(RestoreRequest::new("orders", regular_docs(3)))
            .await
            .unwrap();

        assert_eq!(outcome.upserted, 1);
        assert_eq!(outcome.failures[0].id, "doc1");
        assert_eq!(outcome.failures[0].reason, "forbidden (read only)");
        assert_eq!(outcome.inconsistent, vec!["doc2".to_string()]);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.summary(), "1 of 3 documents restored");
    }

    #[tokio::test]
    async fn test_unparseable_bulk_response_is_warning() {
        let mock = MockCouch::with(|s| {
            s.bulk_response = Some(BulkResponse::Unparseable("<html>".to_string()));
            s.doc_count = 2;
        });

        let outcome = RestoreEngine::new(&mock)
            .restore(RestoreRequest::new("orders", regular_docs(2)))
            .await
            .unwrap();

        assert_eq!(outcome.upserted, 2);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_request_is_sanitized() {
        let mock = MockCouch::default();
        let docs = vec![doc(json!({"_id": "a", "_attachments": {"f": {"stub": true}}}))];

        RestoreEngine::new(&mock)
            .restore(RestoreRequest::new("orders", docs))
            .await
            .unwrap();

        let state = mock.state.lock().unwrap();
        assert!(!state.bulk_docs[0].contains_key("_attachments"));
    }

    #[tokio::test]
    async fn test_clean_restore_deletes_then_creates() {
        let mock = MockCouch::with(|s| s.exists = true);

        RestoreEngine::new(&mock)
            .restore(RestoreRequest::new("orders", Vec::new()).clean(true))
            .await
            .unwrap();

        assert_eq!(mock.calls(), vec!["head", "delete", "create", "info"]);
    }

    #[tokio::test]
    async fn test_existing_database_is_reused() {
        let mock = MockCouch::with(|s| s.exists = true);

        RestoreEngine::new(&mock)
            .restore(RestoreRequest::new("orders", regular_docs(1)))
            .await
            .unwrap();

        assert_eq!(mock.calls(), vec!["head", "bulk", "info"]);
    }

    #[tokio::test]
    async fn test_provisioning_failure_aborts() {
        let mock = MockCouch::with(|s| s.fail_create = true);
        let mut engine = RestoreEngine::new(&mock);

        let err = engine
            .restore(RestoreRequest::new("orders", regular_docs(2)))
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::Provisioning { status: 401, .. }));
        assert_eq!(engine.stage(), RestoreStage::Failed);
        assert!(!mock.calls().contains(&"bulk".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_before_design_docs() {
        let mock = MockCouch::default();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let docs = vec![doc(json!({"_id": "_design/a"})), doc(json!({"_id": "_design/b"}))];

        let mut engine = RestoreEngine::new(&mock);
        let err = engine
            .restore(RestoreRequest::new("orders", docs).with_cancel(cancel))
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::Cancelled));
        assert_eq!(engine.stage(), RestoreStage::Failed);
        assert!(!mock.calls().contains(&"put".to_string()));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_reported_not_raised() {
        let mock = MockCouch::with(|s| s.doc_count = 7);

        let outcome = RestoreEngine::new(&mock)
            .restore(RestoreRequest::new("orders", regular_docs(3)))
            .await
            .unwrap();

        assert_eq!(
            outcome.verification,
            Verification::Mismatch {
                expected: 3,
                actual: 7
            }
        );
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.stage, RestoreStage::Done);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
