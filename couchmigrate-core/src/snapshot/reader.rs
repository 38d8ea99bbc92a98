//! Reads backup artifacts back into document sets.
//!
//! Two shapes are accepted: the canonical `{"docs": [...]}` body and the
//! legacy `{"rows": [{"doc": ...}]}` body produced by dumping `_all_docs`
//! directly. Nothing else is guessed at.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::artifact_file_name;
use crate::document::Document;
use crate::error::{MigrateError, Result};

/// Which shape an artifact was stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactShape {
    Canonical,
    Legacy,
}

/// A parsed artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArtifact {
    pub shape: ArtifactShape,
    pub documents: Vec<Document>,
}

/// Reads and parses the artifact at `path`.
pub fn read_artifact(path: &Path) -> Result<ParsedArtifact> {
    let text = fs::read_to_string(path).map_err(|e| MigrateError::io(path, e))?;
    let parsed = parse_artifact(&text)?;
    tracing::info!(
        "Read {} documents from {} ({:?} format)",
        parsed.documents.len(),
        path.display(),
        parsed.shape
    );
    Ok(parsed)
}

/// Parses artifact text, trying the canonical shape before the legacy one.
pub fn parse_artifact(text: &str) -> Result<ParsedArtifact> {
    let value: Value = serde_json::from_str(text).map_err(|e| MigrateError::Parse(e.to_string()))?;

    let Value::Object(root) = value else {
        return Err(MigrateError::Format(
            "top level is not an object".to_string(),
        ));
    };

    if let Some(docs) = root.get("docs") {
        return Ok(ParsedArtifact {
            shape: ArtifactShape::Canonical,
            documents: canonical_documents(docs)?,
        });
    }

    if let Some(rows) = root.get("rows") {
        return Ok(ParsedArtifact {
            shape: ArtifactShape::Legacy,
            documents: legacy_documents(rows)?,
        });
    }

    Err(MigrateError::Format(
        "missing 'docs' or 'rows' key".to_string(),
    ))
}

fn canonical_documents(docs: &Value) -> Result<Vec<Document>> {
    let entries = docs
        .as_array()
        .ok_or_else(|| MigrateError::Format("'docs' is not an array".to_string()))?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| as_document(entry, || format!("document {} is not an object", i)))
        .collect()
}

fn legacy_documents(rows: &Value) -> Result<Vec<Document>> {
    let entries = rows
        .as_array()
        .ok_or_else(|| MigrateError::Format("'rows' is not an array".to_string()))?;

    let mut documents = Vec::with_capacity(entries.len());
    for (i, row) in entries.iter().enumerate() {
        let row: &Map<String, Value> = row
            .as_object()
            .ok_or_else(|| MigrateError::Format(format!("row {} is not an object", i)))?;
        // Rows without a doc (deleted or missing ids) carry nothing to restore.
        if let Some(doc) = row.get("doc") {
            documents.push(as_document(doc, || format!("row {} doc is not an object", i))?);
        }
    }
    Ok(documents)
}

fn as_document(value: &Value, describe: impl FnOnce() -> String) -> Result<Document> {
    Document::from_value(value.clone()).ok_or_else(|| MigrateError::Format(describe()))
}

/// Finds the artifact for `database` in `dir` or one directory below it.
///
/// When several nested backups contain the database, the lexically last
/// (newest timestamp) wins.
pub fn locate_artifact(dir: &Path, database: &str) -> Option<PathBuf> {
    let file_name = artifact_file_name(database);

    let direct = dir.join(&file_name);
    if direct.is_file() {
        return Some(direct);
    }

    let mut nested: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .map(|path| path.join(&file_name))
        .filter(|path| path.is_file())
        .collect();
    nested.sort();
    nested.pop()
}
