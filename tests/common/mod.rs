//! Shared test utilities for Sterling
//!
//! Provides an in-process fake of the runner server: scripted SSE streams
//! for `/agent/stream`, a run list for the sidebar, and recorders for the
//! action endpoints so tests can assert on what the client sent.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sterling::Config;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One `event:`/`data:` pair on the fake stream
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

pub fn frame(event: &str, data: impl Into<String>) -> SseFrame {
    SseFrame {
        event: event.to_string(),
        data: data.into(),
    }
}

/// A run that pushes a change and ends cleanly
pub fn successful_run_script(run_id: &str, branch: &str) -> Vec<SseFrame> {
    vec![
        frame(
            "run-info",
            json!({ "runId": run_id, "branchName": branch }).to_string(),
        ),
        frame("status", "Running agent"),
        frame("status", "Running git_fpush.sh"),
        frame(
            "output",
            "3 files changed, 1 insertion(+)\ncodex\nCalculator added.",
        ),
        frame("end", "git_fpush.sh exited with code 0."),
    ]
}

/// Requests the fake server has seen
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub stream_queries: Vec<HashMap<String, String>>,
    pub runs_queries: Vec<HashMap<String, String>>,
    pub diff_queries: Vec<HashMap<String, String>>,
    pub meta_queries: Vec<HashMap<String, String>>,
    pub file_tree_queries: Vec<HashMap<String, String>>,
    pub merge_bodies: Vec<Value>,
    pub update_branch_bodies: Vec<Value>,
    pub archived: Vec<String>,
}

#[derive(Default)]
struct ServerState {
    scripts: Mutex<HashMap<String, Vec<SseFrame>>>,
    default_script: Mutex<Vec<SseFrame>>,
    stream_rejection: Mutex<Option<(StatusCode, String)>>,
    runs: Mutex<Vec<Value>>,
    merge_response: Mutex<Value>,
    recorded: Mutex<Recorded>,
}

/// Fake runner server bound to an ephemeral localhost port
pub struct FakeRunnerServer {
    base_url: String,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl FakeRunnerServer {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        *state.merge_response.lock() = json!({ "output": "Merged." });

        let app = Router::new()
            .route("/agent/stream", get(stream))
            .route("/agent/runs/data", get(runs))
            .route("/agent/git-diff", get(git_diff))
            .route("/agent/project-meta", get(project_meta))
            .route("/agent/file-tree", get(file_tree))
            .route("/agent/merge", post(merge))
            .route("/agent/update-branch", post(update_branch))
            .route("/agent/run/{id}/archive", post(archive))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake server");
        let addr = listener.local_addr().expect("fake server address");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake server");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            task,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Client config pointed at this server
    pub fn config(&self) -> Config {
        Config::default().with_server_url(self.base_url.clone())
    }

    /// Frames streamed for any prompt without its own script
    pub fn set_default_script(&self, frames: Vec<SseFrame>) {
        *self.state.default_script.lock() = frames;
    }

    /// Frames streamed when the request's prompt equals `prompt`
    pub fn script_for(&self, prompt: &str, frames: Vec<SseFrame>) {
        self.state.scripts.lock().insert(prompt.to_string(), frames);
    }

    /// Refuse every stream with an HTTP error instead of SSE
    pub fn reject_streams(&self, status: StatusCode, body: &str) {
        *self.state.stream_rejection.lock() = Some((status, body.to_string()));
    }

    pub fn set_runs(&self, runs: Vec<Value>) {
        *self.state.runs.lock() = runs;
    }

    pub fn set_merge_response(&self, response: Value) {
        *self.state.merge_response.lock() = response;
    }

    pub fn recorded(&self) -> Recorded {
        self.state.recorded.lock().clone()
    }
}

impl Drop for FakeRunnerServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn stream(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let prompt = query.get("prompt").cloned().unwrap_or_default();
    state.recorded.lock().stream_queries.push(query);

    if let Some((status, body)) = state.stream_rejection.lock().clone() {
        return (status, body).into_response();
    }

    let frames = state
        .scripts
        .lock()
        .get(&prompt)
        .cloned()
        .unwrap_or_else(|| state.default_script.lock().clone());
    let events = frames
        .into_iter()
        .map(|f| Ok::<_, Infallible>(Event::default().event(f.event).data(f.data)));
    Sse::new(futures::stream::iter(events)).into_response()
}

async fn runs(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.recorded.lock().runs_queries.push(query);
    Json(json!({ "runs": state.runs.lock().clone() }))
}

async fn git_diff(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
) -> &'static str {
    state.recorded.lock().diff_queries.push(query);
    "diff --git a/calc.rs b/calc.rs\n+fn add(a: i32, b: i32) -> i32 { a + b }\n"
}

async fn project_meta(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.recorded.lock().meta_queries.push(query);
    Json(json!({
        "branchName": "main",
        "repoConfigBranch": "main",
        "repoName": "calc",
        "isDemo": false
    }))
}

async fn file_tree(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.recorded.lock().file_tree_queries.push(query);
    Json(json!({
        "fileTree": [{ "name": "calc.rs", "type": "file" }],
        "truncated": false
    }))
}

async fn merge(State(state): State<Arc<ServerState>>, Json(body): Json<Value>) -> Json<Value> {
    state.recorded.lock().merge_bodies.push(body);
    Json(state.merge_response.lock().clone())
}

async fn update_branch(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.recorded.lock().update_branch_bodies.push(body);
    Json(json!({ "output": "Branch updated." }))
}

async fn archive(State(state): State<Arc<ServerState>>, Path(id): Path<String>) -> Json<Value> {
    state.recorded.lock().archived.push(id);
    Json(json!({ "output": "Archived." }))
}
