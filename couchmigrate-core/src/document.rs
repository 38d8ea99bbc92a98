//! CouchDB documents, design-document classification and attachment
//! sanitizing.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id prefix reserved for design documents.
pub const DESIGN_PREFIX: &str = "_design/";

const ID: &str = "_id";
const REV: &str = "_rev";
const ATTACHMENTS: &str = "_attachments";

/// A single CouchDB document: a JSON object with reserved `_id` and `_rev`
/// keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Builds a document from a JSON value, or `None` if it is not an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// The `_id`, if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID).and_then(Value::as_str)
    }

    /// The `_rev`, if present and a string.
    pub fn rev(&self) -> Option<&str> {
        self.0.get(REV).and_then(Value::as_str)
    }

    /// Returns true if the `_id` carries the `_design/` prefix.
    pub fn is_design(&self) -> bool {
        self.id().is_some_and(|id| id.starts_with(DESIGN_PREFIX))
    }

    /// Returns a copy of this document with `_rev` removed.
    pub fn without_rev(&self) -> Self {
        let mut fields = self.0.clone();
        fields.remove(REV);
        Self(fields)
    }

    /// Sets `_rev`, replacing any previous value.
    pub fn set_rev(&mut self, rev: impl Into<String>) {
        self.0.insert(REV.to_string(), Value::String(rev.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A document set split into design and regular documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified<T> {
    pub design: Vec<T>,
    pub regular: Vec<T>,
}

impl<T> Classified<T> {
    pub fn len(&self) -> usize {
        self.design.len() + self.regular.len()
    }

    pub fn is_empty(&self) -> bool {
        self.design.is_empty() && self.regular.is_empty()
    }
}

/// Partitions documents by the `_design/` prefix, preserving relative order.
///
/// Works on owned documents as well as references. A document with no
/// string `_id` is regular.
pub fn classify<I, T>(docs: I) -> Classified<T>
where
    I: IntoIterator<Item = T>,
    T: Borrow<Document>,
{
    let mut design = Vec::new();
    let mut regular = Vec::new();

    for doc in docs {
        if doc.borrow().is_design() {
            design.push(doc);
        } else {
            regular.push(doc);
        }
    }

    Classified { design, regular }
}

/// What a document's `_attachments` field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    /// No `_attachments` field, or not an object.
    None,
    /// Only stub entries: metadata the target cannot resolve.
    StubsOnly,
    /// At least one entry carries inline data.
    HasData,
    /// Entries that are neither stubs nor inline data.
    Other,
}

/// Inspects the `_attachments` field of a document.
pub fn attachment_state(doc: &Document) -> AttachmentState {
    let Some(Value::Object(attachments)) = doc.get(ATTACHMENTS) else {
        return AttachmentState::None;
    };

    let mut has_stubs = false;
    for entry in attachments.values() {
        if entry.get("data").is_some() {
            return AttachmentState::HasData;
        }
        if entry.get("stub").and_then(Value::as_bool) == Some(true) {
            has_stubs = true;
        }
    }

    if has_stubs {
        AttachmentState::StubsOnly
    } else {
        AttachmentState::Other
    }
}

/// Prepares a document for a bulk replay.
///
/// If `_attachments` holds stubs and no inline data, the whole field is
/// dropped; a target that never saw the blobs rejects such documents.
/// Anything else, including mixed stub/data attachments, passes through.
pub fn sanitize(doc: &Document) -> Document {
    let mut cleaned = doc.clone();
    if attachment_state(doc) == AttachmentState::StubsOnly {
        tracing::debug!(
            "Removing attachment stubs from {}",
            doc.id().unwrap_or("unknown")
        );
        cleaned.0.remove(ATTACHMENTS);
    }
    cleaned
}
