//! In-process mock of the job tracker HTTP API.

use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::extract::OriginalUri;
use axum::{Json, Router};
use serde_json::json;

/// Scan ID for which the mock answers 404.
pub const MISSING_SCAN: i64 = 404;

/// Size of the database file served by the mock.
pub const DB_SIZE: usize = 256 * 1024;

/// One request as seen by the mock.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub api_key: Option<String>,
    pub accept: Option<String>,
}

/// One multipart field received on the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadedField {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub len: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockTracker {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub uploads: Arc<Mutex<Vec<UploadedField>>>,
}

impl MockTracker {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.path).collect()
    }

    fn record(&self, method: Method, uri: &Uri, headers: &HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        self.calls.lock().unwrap().push(Call {
            method,
            path: uri.path().to_string(),
            api_key: header("x-api-key"),
            accept: header("accept"),
        });
    }
}

/// Start the mock on an ephemeral port. Returns its base URL (with the
/// `/api` prefix) and a handle to the recorded traffic.
pub async fn spawn_tracker() -> (String, MockTracker) {
    let state = MockTracker::default();
    let routes = Router::new()
        .route("/scans/{id}/seqs", get(seqs))
        .route("/scans/{id}/prods/", post(upload))
        .route("/jobs/{id}/set-run", patch(ok))
        .route("/jobs/{id}/progress/increment/{n}", patch(ok))
        .route("/hmms/{id}/download", get(hmm))
        .route("/dbs/{id}/download", get(db));
    let app = Router::new()
        .nest("/api", routes)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock tracker");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve mock tracker");
    });
    (format!("http://{addr}/api"), state)
}

async fn seqs(
    State(state): State<MockTracker>,
    Path(id): Path<i64>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.record(method, &uri, &headers);
    if id == MISSING_SCAN {
        return (StatusCode::NOT_FOUND, "scan not found").into_response();
    }
    Json(json!([
        {"id": 1, "scan_id": id, "name": "seq1", "data": "ACGTACGT"},
        {"id": 2, "scan_id": id, "name": "seq2", "data": "TTGCA"},
    ]))
    .into_response()
}

async fn ok(
    State(state): State<MockTracker>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.record(method, &uri, &headers);
    Json(json!({}))
}

async fn hmm(
    State(state): State<MockTracker>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.record(method, &uri, &headers);
    "HMMER3/f [mock]\n//\n"
}

async fn db(
    State(state): State<MockTracker>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.record(method, &uri, &headers);
    vec![7u8; DB_SIZE]
}

async fn upload(
    State(state): State<MockTracker>,
    Path(id): Path<i64>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> impl IntoResponse {
    state.record(method, &uri, &headers);
    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let len = field.bytes().await.expect("field bytes").len();
        state.uploads.lock().unwrap().push(UploadedField {
            name,
            file_name,
            content_type,
            len,
        });
    }
    (StatusCode::CREATED, Json(json!({"id": 1, "scan_id": id})))
}
