//! The CouchDB HTTP surface the engine consumes.
//!
//! [`CouchApi`] is the seam between the engine and the store. [`CouchClient`]
//! implements it over HTTP; tests substitute in-memory implementations.

mod client;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::Result;

pub use client::{CouchClient, Timeouts};

/// Database metadata returned by `GET /{db}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    #[serde(default)]
    pub db_name: String,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(default)]
    pub doc_del_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<DatabaseSizes>,
}

/// The `sizes` object reported by CouchDB 2.x and later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSizes {
    #[serde(default)]
    pub file: u64,
    #[serde(default)]
    pub external: u64,
    #[serde(default)]
    pub active: u64,
}

impl DatabaseInfo {
    /// Storage size in bytes, preferring the legacy `data_size` figure.
    pub fn storage_bytes(&self) -> u64 {
        self.data_size
            .or_else(|| self.sizes.as_ref().map(|s| s.active))
            .unwrap_or(0)
    }
}

/// Outcome of a single-document `PUT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Stored (HTTP 200, 201 or 202).
    Stored { rev: Option<String> },
    /// The id is already occupied by a different revision (HTTP 409).
    Conflict,
    /// Any other rejection.
    Rejected { status: u16, reason: String },
}

/// One entry of a `_bulk_docs` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of a `_bulk_docs` request; also the canonical artifact shape.
#[derive(Debug, Clone, Serialize)]
pub struct BulkRequest<'a> {
    pub new_edits: bool,
    pub docs: &'a [Document],
}

/// Interpreted `_bulk_docs` response from a successful HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkResponse {
    Results(Vec<BulkResult>),
    /// The body could not be read as a result array.
    Unparseable(String),
}

/// Operations the migration engine needs from a CouchDB server.
///
/// Every call is a single request with its own timeout. Implementations
/// must report transport failures as `Connectivity`/`Timeout` errors and
/// keep per-document rejections in the returned values.
#[allow(async_fn_in_trait)]
pub trait CouchApi {
    /// Liveness probe (`GET /_up`).
    async fn ping(&self) -> Result<()>;

    /// Lists user databases, excluding names with a leading underscore.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Fetches database metadata, or `None` if the database does not exist.
    async fn database_info(&self, db: &str) -> Result<Option<DatabaseInfo>>;

    /// Existence probe (`HEAD /{db}`).
    async fn database_exists(&self, db: &str) -> Result<bool>;

    /// Creates a database; "already exists" counts as success.
    async fn create_database(&self, db: &str) -> Result<()>;

    /// Deletes a database; "not found" counts as success.
    async fn delete_database(&self, db: &str) -> Result<()>;

    /// Fetches every document with attachments inlined.
    async fn fetch_all_docs(&self, db: &str) -> Result<Vec<Document>>;

    /// Creates or updates a single document.
    async fn put_document(&self, db: &str, doc: &Document) -> Result<PutOutcome>;

    /// Returns the current revision of a document, if it exists.
    async fn current_revision(&self, db: &str, id: &str) -> Result<Option<String>>;

    /// Submits a bulk upsert. Non-success statuses are errors.
    async fn bulk_docs(&self, db: &str, request: &BulkRequest<'_>) -> Result<BulkResponse>;
}
