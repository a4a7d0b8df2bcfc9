//! In-process mock of the analysis backend, served by axum on a free port.

#![allow(dead_code)]

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const JOB_ID: &str = "3f2a9c1e-job";
pub const LONG_SOURCE_CHARS: usize = 420;

#[derive(Default)]
pub struct MockState {
    pub uploads: Mutex<Vec<(String, usize)>>,
    pub analyze_bodies: Mutex<Vec<Value>>,
    pub polls: AtomicUsize,
    pub queries: Mutex<Vec<Value>>,
}

impl MockState {
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

pub struct MockBackend {
    pub port: u16,
    pub state: Arc<MockState>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Book Analysis API is running" }))
}

async fn upload(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(_) => return detail(StatusCode::BAD_REQUEST, "could not read upload"),
        };
        if bytes.is_empty() {
            return detail(StatusCode::BAD_REQUEST, "Failed to extract text from file.");
        }
        state.uploads.lock().unwrap().push((name.clone(), bytes.len()));
        return Json(json!({
            "filename": name,
            "message": "File uploaded successfully",
            "text_length": bytes.len(),
            "estimated_tokens": bytes.len() / 4,
        }))
        .into_response();
    }
    detail(StatusCode::UNPROCESSABLE_ENTITY, "file field missing")
}

async fn analyze(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.analyze_bodies.lock().unwrap().push(body.clone());
    if body["api_key"].as_str().unwrap_or_default().is_empty() {
        return detail(StatusCode::BAD_REQUEST, "API key required");
    }
    Json(json!({ "task_id": JOB_ID, "status": "processing" })).into_response()
}

/// First poll reports 40%, every later poll reports completion as book `b1`.
async fn status(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Response {
    if id != JOB_ID {
        return detail(StatusCode::NOT_FOUND, "Task not found");
    }
    let n = state.polls.fetch_add(1, Ordering::SeqCst);
    if n == 0 {
        Json(json!({
            "status": "processing",
            "progress": 40,
            "message": "Analyzing chunk batch 2/5",
        }))
        .into_response()
    } else {
        Json(json!({
            "status": "completed",
            "progress": 100,
            "message": "Analysis complete",
            "result": { "book_id": "b1" },
        }))
        .into_response()
    }
}

/// Written by hand so key order on the wire is `b2`, `b1`.
async fn books() -> Response {
    let body = r#"{
        "b2": {"id": "b2", "title": "Typee", "graph_file": "data/b2.json", "timestamp": 1700100000.25},
        "b1": {"id": "b1", "title": "Moby Dick", "graph_file": "data/b1.json", "timestamp": 1700000000.5}
    }"#;
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn book(Path(id): Path<String>) -> Response {
    if id != "b1" {
        return detail(StatusCode::NOT_FOUND, "Book not found");
    }
    Json(json!({
        "directed": false,
        "multigraph": false,
        "graph": {},
        "nodes": [
            {"id": "Ahab", "type": "PERSON", "description": "Captain of the Pequod", "group": 1, "val": 9},
            {"id": "Ishmael", "type": "PERSON", "description": "Narrator", "group": 1, "val": 5},
            {"id": "Pequod", "type": "SHIP", "group": 1},
            {"id": "Queequeg", "type": "PERSON", "group": 1, "val": 3}
        ],
        "edges": [
            {"source": "Ahab", "target": "Pequod", "type": "COMMANDS", "weight": 1.0},
            {"source": "Ishmael", "target": "Queequeg", "type": "FRIEND_OF", "weight": 1.0},
            {"source": "Ahab", "target": "Moby Dick", "type": "HUNTS", "weight": 1.0}
        ]
    }))
    .into_response()
}

async fn query(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.queries.lock().unwrap().push(body.clone());
    if body["book_id"] == "b2" {
        return Json(json!({ "answer": "Error: Book has not been indexed yet." })).into_response();
    }
    Json(json!({
        "answer": {
            "answer": "Ahab is the captain of the Pequod.",
            "sources": ["c".repeat(LONG_SOURCE_CHARS), "Call me Ishmael."],
        }
    }))
    .into_response()
}

pub fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/upload", post(upload))
        .route("/analyze", post(analyze))
        .route("/status/{id}", get(status))
        .route("/books", get(books))
        .route("/book/{id}", get(book))
        .route("/query", post(query))
        .with_state(state)
}

pub fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Mock backend did not become ready within 5 seconds");
}

pub async fn start_mock_backend() -> MockBackend {
    let port = find_free_port();
    let state = Arc::new(MockState::default());
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    wait_for_server(port).await;
    MockBackend {
        port,
        state,
        handle,
    }
}

/// Write a config pointing at `url` into a temp dir.
pub fn write_config(url: &str, api_key: Option<&str>) -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bka.toml");
    let credential = match api_key {
        Some(key) => format!("api_key = \"{}\"\nenv = \"BKA_TEST_UNSET_KEY\"", key),
        None => "env = \"BKA_TEST_UNSET_KEY\"".to_string(),
    };
    let content = format!(
        r#"[backend]
url = "{url}"
timeout_secs = 5

[credential]
{credential}

[jobs]
poll_interval_ms = 20
request_timeout_secs = 5
"#
    );
    std::fs::write(&path, content).unwrap();
    (tmp, path)
}
