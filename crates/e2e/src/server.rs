//! In-process fake of the comparison service
//!
//! Speaks the same wire protocol as the real service: session start,
//! framed match/replace uploads, session end, and long-running tasks
//! answered through `202 Accepted` + `Location` polling. Behaviour is
//! scripted per test through [`Behavior`].

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use eyes_common::delta::DeltaPayload;
use eyes_common::{MatchResult, MatchWindowData, SessionStartInfo, TestResults, TestResultsStatus};

use crate::error::{E2eError, E2eResult};

pub const API_KEY: &str = "e2e-api-key";

/// Scripted behaviour of the fake service
#[derive(Debug, Clone)]
pub struct Behavior {
    pub api_key: String,
    /// Answer session starts with `201 Created`
    pub new_baseline: bool,
    /// `202` answers a task gives before completing; with zero, long
    /// requests are answered inline
    pub poll_rounds: u32,
    /// Polls answered with `410 Gone` before tasks behave normally
    pub gone_polls: u32,
    /// Per-upload match outcomes, consumed in order
    pub match_script: VecDeque<bool>,
    /// Outcome once the script is exhausted
    pub default_match: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            api_key: API_KEY.to_string(),
            new_baseline: false,
            poll_rounds: 0,
            gone_polls: 0,
            match_script: VecDeque::new(),
            default_match: true,
        }
    }
}

/// An upload as seen by the service
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub session_id: String,
    pub tag: String,
    pub ignore_mismatch: bool,
    pub user_inputs: usize,
    pub replace_step: Option<u32>,
    pub is_delta: bool,
    pub as_expected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEnd {
    pub aborted: bool,
    pub update_baseline: bool,
}

struct Task {
    body: serde_json::Value,
    polls_left: u32,
}

#[derive(Default)]
struct Counters {
    starts: usize,
    long_requests: usize,
    polls: usize,
}

struct Inner {
    behavior: Behavior,
    sessions: HashMap<String, TestResults>,
    tasks: HashMap<String, Task>,
    uploads: Vec<RecordedUpload>,
    ends: Vec<RecordedEnd>,
    counters: Counters,
}

pub struct FakeService {
    inner: Mutex<Inner>,
}

impl FakeService {
    fn new(behavior: Behavior) -> Self {
        Self {
            inner: Mutex::new(Inner {
                behavior,
                sessions: HashMap::new(),
                tasks: HashMap::new(),
                uploads: Vec::new(),
                ends: Vec::new(),
                counters: Counters::default(),
            }),
        }
    }

    fn authorized(&self, query: &HashMap<String, String>) -> bool {
        let inner = self.inner.lock();
        query.get("apiKey") == Some(&inner.behavior.api_key)
    }

    /// Answer inline or park the body in a task, depending on the behaviour
    fn long_response(&self, headers: &HeaderMap, body: serde_json::Value) -> Response {
        let mut inner = self.inner.lock();
        inner.counters.long_requests += 1;

        let wants_polling = headers
            .get("Eyes-Expect")
            .map_or(false, |v| v.as_bytes() == b"202+location");
        let deferred = inner.behavior.poll_rounds > 0 || inner.behavior.gone_polls > 0;
        if !wants_polling || !deferred {
            return (StatusCode::OK, Json(body)).into_response();
        }

        let id = Uuid::new_v4().to_string();
        let polls_left = inner.behavior.poll_rounds;
        inner.tasks.insert(id.clone(), Task { body, polls_left });
        debug!("Deferred long request into task {}", id);
        (
            StatusCode::ACCEPTED,
            [(header::LOCATION, format!("/api/tasks/{}", id))],
        )
            .into_response()
    }

    fn upload(
        &self,
        session_id: &str,
        replace_step: Option<u32>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Response {
        let (data, image) = match parse_upload(body) {
            Ok(parsed) => parsed,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };

        let as_expected = {
            let mut inner = self.inner.lock();
            if !inner.sessions.contains_key(session_id) {
                return (StatusCode::NOT_FOUND, "no such session").into_response();
            }

            let as_expected = match inner.behavior.match_script.pop_front() {
                Some(result) => result,
                None => inner.behavior.default_match,
            };
            inner.uploads.push(RecordedUpload {
                session_id: session_id.to_string(),
                tag: data.tag.clone(),
                ignore_mismatch: data.ignore_mismatch,
                user_inputs: data.user_inputs.len(),
                replace_step,
                is_delta: DeltaPayload::is_delta(image),
                as_expected,
            });

            if replace_step.is_none() && (as_expected || !data.ignore_mismatch) {
                if let Some(results) = inner.sessions.get_mut(session_id) {
                    results.steps += 1;
                    if as_expected {
                        results.matches += 1;
                        results.strict_matches += 1;
                    } else {
                        results.mismatches += 1;
                    }
                }
            }
            as_expected
        };

        let result = MatchResult {
            as_expected,
            window_id: None,
        };
        self.long_response(headers, json!(result))
    }
}

/// Split a framed upload into its metadata and image bytes
pub fn parse_upload(body: &[u8]) -> E2eResult<(MatchWindowData, &[u8])> {
    if body.len() < 4 {
        return Err(E2eError::MalformedUpload("missing length prefix".into()));
    }
    let len = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
    let end = 4 + len;
    if body.len() < end {
        return Err(E2eError::MalformedUpload(format!(
            "metadata length {} exceeds body of {} bytes",
            len,
            body.len()
        )));
    }
    let data = serde_json::from_slice(&body[4..end])?;
    Ok((data, &body[end..]))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    #[serde(rename = "startInfo")]
    start_info: SessionStartInfo,
}

async fn start_session(
    State(service): State<Arc<FakeService>>,
    Query(query): Query<HashMap<String, String>>,
    Json(request): Json<StartRequest>,
) -> Response {
    if !service.authorized(&query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let id = Uuid::new_v4().to_string();
    let mut inner = service.inner.lock();
    inner.counters.starts += 1;
    inner.sessions.insert(id.clone(), TestResults::default());
    info!(
        "Started session {} for '{}' of '{}'",
        id, request.start_info.scenario_id_or_name, request.start_info.app_id_or_name
    );

    let status = if inner.behavior.new_baseline {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let body = json!({
        "id": id,
        "sessionId": format!("legacy-{}", id),
        "batchId": request.start_info.batch_info.id,
        "url": format!("/app/sessions/{}", id),
    });
    (status, Json(body)).into_response()
}

async fn match_window(
    State(service): State<Arc<FakeService>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !service.authorized(&query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    service.upload(&id, None, &headers, &body)
}

async fn replace_window(
    State(service): State<Arc<FakeService>>,
    Path((id, step)): Path<(String, u32)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !service.authorized(&query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    service.upload(&id, Some(step), &headers, &body)
}

async fn end_session(
    State(service): State<Arc<FakeService>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !service.authorized(&query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let flag = |name: &str| query.get(name).map_or(false, |v| v == "true");
    let end = RecordedEnd {
        aborted: flag("aborted"),
        update_baseline: flag("updateBaseline"),
    };

    let results = {
        let mut inner = service.inner.lock();
        let Some(mut results) = inner.sessions.remove(&id) else {
            return (StatusCode::NOT_FOUND, "no such session").into_response();
        };
        inner.ends.push(end);

        results.is_aborted = end.aborted;
        results.status = if results.mismatches > 0 {
            TestResultsStatus::Unresolved
        } else {
            TestResultsStatus::Passed
        };
        results
    };
    info!("Ended session {} ({:?}): {}", id, end, results);
    service.long_response(&headers, json!(results))
}

async fn poll_task(
    State(service): State<Arc<FakeService>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !service.authorized(&query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut inner = service.inner.lock();
    inner.counters.polls += 1;
    if inner.behavior.gone_polls > 0 {
        inner.behavior.gone_polls -= 1;
        inner.tasks.remove(&id);
        return StatusCode::GONE.into_response();
    }

    let Some(task) = inner.tasks.get_mut(&id) else {
        return StatusCode::GONE.into_response();
    };
    if task.polls_left > 0 {
        task.polls_left -= 1;
        return StatusCode::ACCEPTED.into_response();
    }
    (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/tasks/{}/result", id))],
    )
        .into_response()
}

async fn task_result(
    State(service): State<Arc<FakeService>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !service.authorized(&query) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match service.inner.lock().tasks.remove(&id) {
        Some(task) => (StatusCode::OK, Json(task.body)).into_response(),
        None => StatusCode::GONE.into_response(),
    }
}

fn router(service: Arc<FakeService>) -> Router {
    Router::new()
        .route("/api/sessions/running", post(start_session))
        .route(
            "/api/sessions/running/:id",
            post(match_window).delete(end_session),
        )
        .route("/api/sessions/running/:id/:step", put(replace_window))
        .route("/api/tasks/:id", get(poll_task))
        .route("/api/tasks/:id/result", delete(task_result))
        .with_state(service)
}

/// A running fake service; stops when dropped
pub struct FakeServer {
    addr: SocketAddr,
    service: Arc<FakeService>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn spawn(behavior: Behavior) -> E2eResult<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| E2eError::ServerStartup(format!("bind: {}", e)))?;
        let addr = listener.local_addr()?;

        let service = Arc::new(FakeService::new(behavior));
        let app = router(service.clone());
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("Fake service stopped: {}", e);
            }
        });

        info!("Fake comparison service listening on {}", addr);
        Ok(Self {
            addr,
            service,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue match outcomes for the next uploads
    pub fn script(&self, results: &[bool]) {
        self.service
            .inner
            .lock()
            .behavior
            .match_script
            .extend(results.iter().copied());
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.service.inner.lock().uploads.clone()
    }

    pub fn ends(&self) -> Vec<RecordedEnd> {
        self.service.inner.lock().ends.clone()
    }

    pub fn starts(&self) -> usize {
        self.service.inner.lock().counters.starts
    }

    /// Match, replace and end requests received, retries included
    pub fn long_requests(&self) -> usize {
        self.service.inner.lock().counters.long_requests
    }

    pub fn polls(&self) -> usize {
        self.service.inner.lock().counters.polls
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upload() {
        let data = MatchWindowData::new("t".into(), "tag".into(), vec![], true, None);
        let json = serde_json::to_vec(&data).unwrap();
        let mut body = (json.len() as u32).to_be_bytes().to_vec();
        body.extend_from_slice(&json);
        body.extend_from_slice(b"img");

        let (parsed, image) = parse_upload(&body).unwrap();
        assert_eq!(parsed.tag, "tag");
        assert!(parsed.ignore_mismatch);
        assert_eq!(image, b"img");
    }

    #[test]
    fn test_parse_upload_truncated() {
        let body = [0, 0, 0, 50, b'{'];
        assert!(matches!(
            parse_upload(&body),
            Err(E2eError::MalformedUpload(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_wrong_api_key() {
        let server = FakeServer::spawn(Behavior::default()).await.unwrap();
        let response = reqwest::Client::new()
            .post(format!("{}/api/sessions/running?apiKey=nope", server.url()))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        assert_eq!(server.starts(), 0);
    }
}
