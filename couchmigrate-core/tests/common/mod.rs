//! In-process fake CouchDB served over real HTTP.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use couchmigrate_core::{CouchClient, Document, Timeouts};

pub type Docs = BTreeMap<String, Value>;

#[derive(Default)]
pub struct FakeState {
    pub databases: BTreeMap<String, Docs>,
    /// Answer successful bulk writes with `[]`.
    pub empty_bulk_response: bool,
    /// Databases whose creation is refused with 401.
    pub locked: HashSet<String>,
    /// Databases whose metadata is refused with 403.
    pub forbidden: HashSet<String>,
    /// Delay applied to `_all_docs`.
    pub fetch_delay: Option<Duration>,
    next_rev: u64,
}

impl FakeState {
    fn new_rev(&mut self) -> String {
        self.next_rev += 1;
        format!("{}-fake", self.next_rev)
    }
}

#[derive(Clone)]
pub struct FakeCouch {
    pub url: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeCouch {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let app = Router::new()
            .route("/_up", get(up))
            .route("/_all_dbs", get(all_dbs))
            .route("/{db}", get(db_info).put(create_db).delete(delete_db))
            .route("/{db}/_all_docs", get(all_docs))
            .route("/{db}/_bulk_docs", post(bulk_docs))
            .route("/{db}/_design/{name}", get(get_design).put(put_design))
            .route("/{db}/{id}", get(get_doc).put(put_doc))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://admin:secret@{}/", addr),
            state,
        }
    }

    pub fn client(&self) -> CouchClient {
        CouchClient::from_url(&self.url).unwrap()
    }

    pub fn client_with_timeouts(&self, timeouts: Timeouts) -> CouchClient {
        CouchClient::with_timeouts(self.client().connection().clone(), timeouts)
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Creates `db` holding `docs` as stored.
    pub fn seed(&self, db: &str, docs: &[Value]) {
        let mut state = self.state();
        let stored = state.databases.entry(db.to_string()).or_default();
        for doc in docs {
            let id = doc["_id"].as_str().unwrap().to_string();
            stored.insert(id, doc.clone());
        }
    }

    pub fn docs(&self, db: &str) -> Docs {
        self.state().databases.get(db).cloned().unwrap_or_default()
    }

    pub fn ids(&self, db: &str) -> Vec<String> {
        self.docs(db).keys().cloned().collect()
    }
}

/// A URL on which nothing is listening.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/", addr)
}

pub fn doc(value: Value) -> Document {
    Document::from_value(value).unwrap()
}

type Shared = State<Arc<Mutex<FakeState>>>;

fn error(status: StatusCode, error: &str, reason: &str) -> Response {
    (status, Json(json!({"error": error, "reason": reason}))).into_response()
}

async fn up() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn all_dbs(State(state): Shared) -> Json<Vec<String>> {
    let state = state.lock().unwrap();
    let mut names = vec!["_replicator".to_string(), "_users".to_string()];
    names.extend(state.databases.keys().cloned());
    Json(names)
}

async fn db_info(State(state): Shared, Path(db): Path<String>) -> Response {
    let state = state.lock().unwrap();
    if state.forbidden.contains(&db) {
        return error(StatusCode::FORBIDDEN, "forbidden", "You are not allowed to access this db.");
    }
    match state.databases.get(&db) {
        Some(docs) => Json(json!({
            "db_name": db,
            "doc_count": docs.len(),
            "doc_del_count": 0,
            "sizes": {"file": 4096, "external": 100, "active": 512}
        }))
        .into_response(),
        None => error(StatusCode::NOT_FOUND, "not_found", "Database does not exist."),
    }
}

async fn create_db(State(state): Shared, Path(db): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    if state.locked.contains(&db) {
        return error(StatusCode::UNAUTHORIZED, "unauthorized", "You are not a server admin.");
    }
    if state.databases.contains_key(&db) {
        return error(StatusCode::PRECONDITION_FAILED, "file_exists", "The database could not be created, the file already exists.");
    }
    state.databases.insert(db, Docs::new());
    (StatusCode::CREATED, Json(json!({"ok": true}))).into_response()
}

async fn delete_db(State(state): Shared, Path(db): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    match state.databases.remove(&db) {
        Some(_) => Json(json!({"ok": true})).into_response(),
        None => error(StatusCode::NOT_FOUND, "not_found", "Database does not exist."),
    }
}

async fn all_docs(State(state): Shared, Path(db): Path<String>) -> Response {
    let delay = state.lock().unwrap().fetch_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let state = state.lock().unwrap();
    let Some(docs) = state.databases.get(&db) else {
        return error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.");
    };
    let rows: Vec<Value> = docs
        .iter()
        .map(|(id, doc)| json!({"id": id, "key": id, "value": {"rev": doc["_rev"]}, "doc": doc}))
        .collect();
    Json(json!({"total_rows": rows.len(), "offset": 0, "rows": rows})).into_response()
}

fn has_stub_attachments(doc: &Value) -> bool {
    doc.get("_attachments")
        .and_then(Value::as_object)
        .is_some_and(|a| a.values().any(|e| e.get("stub") == Some(&json!(true))))
}

async fn bulk_docs(State(state): Shared, Path(db): Path<String>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    let empty = state.empty_bulk_response;
    if !state.databases.contains_key(&db) {
        return error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.");
    }

    let docs = body["docs"].as_array().cloned().unwrap_or_default();
    let mut results = Vec::new();
    for mut doc in docs {
        let id = match doc["_id"].as_str() {
            Some(id) => id.to_string(),
            None => {
                let rev = state.new_rev();
                format!("auto-{}", rev)
            }
        };
        if has_stub_attachments(&doc) {
            results.push(json!({"id": id, "error": "missing_stub", "reason": "Attachment stub without a parent revision"}));
            continue;
        }
        if doc.get("_rev").is_none() {
            doc["_rev"] = json!(state.new_rev());
        }
        doc["_id"] = json!(id);
        let rev = doc["_rev"].clone();
        if let Some(docs) = state.databases.get_mut(&db) {
            docs.insert(id.clone(), doc);
        }
        if !empty {
            results.push(json!({"id": id, "ok": true, "rev": rev}));
        }
    }
    (StatusCode::CREATED, Json(Value::Array(results))).into_response()
}

fn read_doc(state: &FakeState, db: &str, id: &str) -> Response {
    match state.databases.get(db).and_then(|docs| docs.get(id)) {
        Some(doc) => Json(doc.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, "not_found", "missing"),
    }
}

fn write_doc(state: &mut FakeState, db: &str, id: &str, mut doc: Value) -> Response {
    let current = match state.databases.get(db) {
        Some(docs) => docs.get(id).and_then(|d| d["_rev"].as_str()).map(str::to_string),
        None => return error(StatusCode::NOT_FOUND, "not_found", "Database does not exist."),
    };
    let given = doc.get("_rev").and_then(Value::as_str).map(str::to_string);
    if current != given {
        return error(StatusCode::CONFLICT, "conflict", "Document update conflict.");
    }

    let rev = state.new_rev();
    doc["_id"] = json!(id);
    doc["_rev"] = json!(rev);
    if let Some(docs) = state.databases.get_mut(db) {
        docs.insert(id.to_string(), doc);
    }
    (StatusCode::CREATED, Json(json!({"ok": true, "id": id, "rev": rev}))).into_response()
}

async fn get_doc(State(state): Shared, Path((db, id)): Path<(String, String)>) -> Response {
    read_doc(&state.lock().unwrap(), &db, &id)
}

async fn put_doc(
    State(state): Shared,
    Path((db, id)): Path<(String, String)>,
    Json(doc): Json<Value>,
) -> Response {
    write_doc(&mut state.lock().unwrap(), &db, &id, doc)
}

async fn get_design(State(state): Shared, Path((db, name)): Path<(String, String)>) -> Response {
    read_doc(&state.lock().unwrap(), &db, &format!("_design/{}", name))
}

async fn put_design(
    State(state): Shared,
    Path((db, name)): Path<(String, String)>,
    Json(doc): Json<Value>,
) -> Response {
    write_doc(&mut state.lock().unwrap(), &db, &format!("_design/{}", name), doc)
}
