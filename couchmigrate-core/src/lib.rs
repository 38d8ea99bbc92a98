//! couchmigrate core library
//!
//! Backup, restore and one-directional sync of CouchDB databases, including
//! design documents and attachments.

pub mod connection;
pub mod couch;
pub mod document;
pub mod error;
pub mod restore;
pub mod snapshot;
pub mod strategy;
pub mod sync;

pub use connection::{redact, ConnectionDescriptor};
pub use couch::{CouchApi, CouchClient, DatabaseInfo, Timeouts};
pub use document::{attachment_state, classify, sanitize, AttachmentState, Classified, Document};
pub use error::{MigrateError, Result};
pub use restore::{
    CancelFlag, DocumentFailure, RestoreEngine, RestoreOutcome, RestoreRequest, RestoreStage,
    Verification,
};
pub use snapshot::{
    locate_artifact, read_artifact, BackupArtifact, BackupCatalog, BackupEntry, SnapshotWriter,
};
pub use strategy::{Fallback, HttpStrategy, MigrationStrategy, OperationReport, ScriptStrategy};
pub use sync::{SyncOrchestrator, SyncOutcome, SyncSelection};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
