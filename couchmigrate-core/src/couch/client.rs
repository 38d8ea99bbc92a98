//! HTTP implementation of [`CouchApi`] using reqwest.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use super::{BulkRequest, BulkResponse, BulkResult, CouchApi, DatabaseInfo, PutOutcome};
use crate::connection::ConnectionDescriptor;
use crate::document::{Document, DESIGN_PREFIX};
use crate::error::{MigrateError, Result};

/// Per-request timeouts. Exceeding one yields [`MigrateError::Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Liveness probe.
    pub probe: Duration,
    /// Metadata reads, existence probe, create database.
    pub metadata: Duration,
    /// Database deletion.
    pub delete: Duration,
    /// Single-document reads and writes.
    pub document: Duration,
    /// Full export fetch and bulk upsert.
    pub bulk: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(5),
            metadata: Duration::from_secs(10),
            delete: Duration::from_secs(30),
            document: Duration::from_secs(30),
            bulk: Duration::from_secs(300),
        }
    }
}

/// CouchDB client bound to one server.
#[derive(Debug, Clone)]
pub struct CouchClient {
    connection: ConnectionDescriptor,
    base_url: String,
    http: reqwest::Client,
    timeouts: Timeouts,
}

impl CouchClient {
    /// Creates a client with default timeouts.
    pub fn new(connection: ConnectionDescriptor) -> Self {
        Self::with_timeouts(connection, Timeouts::default())
    }

    pub fn with_timeouts(connection: ConnectionDescriptor, timeouts: Timeouts) -> Self {
        let base_url = connection.base_url();
        Self {
            connection,
            base_url,
            http: reqwest::Client::new(),
            timeouts,
        }
    }

    /// Parses a connection URL and creates a client for it.
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self::new(ConnectionDescriptor::parse(url)?))
    }

    pub fn connection(&self) -> &ConnectionDescriptor {
        &self.connection
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// URL of a database.
    fn db_url(&self, db: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(db))
    }

    /// URL of a document. The `_design/` prefix keeps its literal slash.
    fn doc_url(&self, db: &str, id: &str) -> String {
        let path = match id.strip_prefix(DESIGN_PREFIX) {
            Some(name) => format!("{}{}", DESIGN_PREFIX, urlencoding::encode(name)),
            None => urlencoding::encode(id).into_owned(),
        };
        format!("{}/{}", self.db_url(db), path)
    }

    fn request(&self, method: Method, url: &str, timeout: Duration) -> RequestBuilder {
        let builder = self.http.request(method, url).timeout(timeout);
        match self.connection.credentials() {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response> {
        tracing::debug!("{} -> {}", operation, self.connection);
        builder
            .send()
            .await
            .map_err(|e| MigrateError::transport(operation, e))
    }

    async fn read_text(operation: &str, response: Response) -> Result<String> {
        response
            .text()
            .await
            .map_err(|e| MigrateError::transport(operation, e))
    }

    async fn unexpected(operation: &str, response: Response) -> MigrateError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        MigrateError::Http {
            operation: operation.to_string(),
            status,
            body,
        }
    }
}

fn is_accepted(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED
    )
}

fn malformed(operation: &str, message: impl ToString) -> MigrateError {
    MigrateError::MalformedResponse {
        operation: operation.to_string(),
        message: message.to_string(),
    }
}

impl CouchApi for CouchClient {
    async fn ping(&self) -> Result<()> {
        const OP: &str = "liveness probe";
        let url = format!("{}/_up", self.base_url);
        let response = self
            .send(OP, self.request(Method::GET, &url, self.timeouts.probe))
            .await?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(MigrateError::Connectivity {
                operation: OP.to_string(),
                message: format!("HTTP {}", response.status().as_u16()),
            })
        }
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        const OP: &str = "list databases";
        let url = format!("{}/_all_dbs", self.base_url);
        let response = self
            .send(OP, self.request(Method::GET, &url, self.timeouts.metadata))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(Self::unexpected(OP, response).await);
        }

        let text = Self::read_text(OP, response).await?;
        let names: Vec<String> = serde_json::from_str(&text).map_err(|e| malformed(OP, e))?;
        Ok(names.into_iter().filter(|n| !n.starts_with('_')).collect())
    }

    async fn database_info(&self, db: &str) -> Result<Option<DatabaseInfo>> {
        const OP: &str = "database info";
        let response = self
            .send(
                OP,
                self.request(Method::GET, &self.db_url(db), self.timeouts.metadata),
            )
            .await?;

        match response.status() {
            StatusCode::OK => {
                let text = Self::read_text(OP, response).await?;
                let info = serde_json::from_str(&text).map_err(|e| malformed(OP, e))?;
                Ok(Some(info))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected(OP, response).await),
        }
    }

    async fn database_exists(&self, db: &str) -> Result<bool> {
        const OP: &str = "database existence probe";
        let response = self
            .send(
                OP,
                self.request(Method::HEAD, &self.db_url(db), self.timeouts.metadata),
            )
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::unexpected(OP, response).await),
        }
    }

    async fn create_database(&self, db: &str) -> Result<()> {
        const OP: &str = "create database";
        let response = self
            .send(
                OP,
                self.request(Method::PUT, &self.db_url(db), self.timeouts.metadata),
            )
            .await?;

        let status = response.status();
        if is_accepted(status) || status == StatusCode::PRECONDITION_FAILED {
            return Ok(());
        }
        Err(MigrateError::Provisioning {
            database: db.to_string(),
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }

    async fn delete_database(&self, db: &str) -> Result<()> {
        const OP: &str = "delete database";
        let response = self
            .send(
                OP,
                self.request(Method::DELETE, &self.db_url(db), self.timeouts.delete),
            )
            .await?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NOT_FOUND
        ) {
            return Ok(());
        }
        Err(MigrateError::Provisioning {
            database: db.to_string(),
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }

    async fn fetch_all_docs(&self, db: &str) -> Result<Vec<Document>> {
        const OP: &str = "fetch all documents";
        let url = format!(
            "{}/_all_docs?include_docs=true&attachments=true",
            self.db_url(db)
        );
        let response = self
            .send(OP, self.request(Method::GET, &url, self.timeouts.bulk))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(Self::unexpected(OP, response).await);
        }

        let text = Self::read_text(OP, response).await?;
        let body: Value = serde_json::from_str(&text).map_err(|e| malformed(OP, e))?;
        let rows = body
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(OP, "missing 'rows' key"))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("doc").cloned())
            .filter_map(Document::from_value)
            .collect())
    }

    async fn put_document(&self, db: &str, doc: &Document) -> Result<PutOutcome> {
        const OP: &str = "put document";
        let id = doc.id().unwrap_or_default();
        let response = self
            .send(
                OP,
                self.request(Method::PUT, &self.doc_url(db, id), self.timeouts.document)
                    .json(doc),
            )
            .await?;

        let status = response.status();
        if is_accepted(status) {
            let rev = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("rev").and_then(Value::as_str).map(str::to_string));
            return Ok(PutOutcome::Stored { rev });
        }
        if status == StatusCode::CONFLICT {
            return Ok(PutOutcome::Conflict);
        }
        Ok(PutOutcome::Rejected {
            status: status.as_u16(),
            reason: response.text().await.unwrap_or_default(),
        })
    }

    async fn current_revision(&self, db: &str, id: &str) -> Result<Option<String>> {
        const OP: &str = "get document";
        let response = self
            .send(
                OP,
                self.request(Method::GET, &self.doc_url(db, id), self.timeouts.document),
            )
            .await?;

        match response.status() {
            StatusCode::OK => {
                let text = Self::read_text(OP, response).await?;
                let body: Value = serde_json::from_str(&text).map_err(|e| malformed(OP, e))?;
                Ok(body.get("_rev").and_then(Value::as_str).map(str::to_string))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected(OP, response).await),
        }
    }

    async fn bulk_docs(&self, db: &str, request: &BulkRequest<'_>) -> Result<BulkResponse> {
        const OP: &str = "bulk upsert";
        let url = format!("{}/_bulk_docs", self.db_url(db));
        let response = self
            .send(
                OP,
                self.request(Method::POST, &url, self.timeouts.bulk)
                    .json(request),
            )
            .await?;

        let status = response.status();
        if !is_accepted(status) {
            return Err(MigrateError::BulkRejected {
                database: db.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let text = Self::read_text(OP, response).await?;
        Ok(match serde_json::from_str::<Vec<BulkResult>>(&text) {
            Ok(results) => BulkResponse::Results(results),
            Err(_) => BulkResponse::Unparseable(text),
        })
    }
}
