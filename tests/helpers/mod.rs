// tests/helpers/mod.rs
//
// Mock Hubx assessment backend for integration tests. Implements the
// attempt-lifecycle endpoints in memory, records everything it sees, and
// exposes knobs for latency and injected failures. Spawned on a random
// port; tests drive the real `HubxClient` against it.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use hubx_exam_sync::{HubxClient, RetryConfig, SnapshotStore, SyncConfig};

pub struct MockBackend {
    /// paperId of every start call, in order.
    pub started_papers: Mutex<Vec<String>>,
    /// (question_id, raw body) of every answer write that was accepted,
    /// in completion order.
    pub answers_log: Mutex<Vec<(String, Value)>>,
    /// Last accepted value per question, as a backend would store it.
    /// Echoed back in the get-attempt response.
    pub final_answers: Mutex<HashMap<String, Value>>,
    /// Every answer request seen, including ones that were failed or
    /// delayed. Retries show up here.
    pub answer_hits: AtomicUsize,
    pub review_hits: AtomicUsize,
    /// (question_id, isTooHard) of every hard call, in order.
    pub hard_log: Mutex<Vec<(String, bool)>>,
    pub submit_hits: AtomicUsize,
    /// Artificial per-request latency for answer writes, popped front.
    pub answer_delays_ms: Mutex<VecDeque<u64>>,
    /// Fail this many answer writes with a 500 before accepting again.
    pub fail_next_answers: Mutex<u32>,
    /// Artificial per-request latency for submit calls, popped front.
    pub submit_delays_ms: Mutex<VecDeque<u64>>,
    /// Fail this many submit calls with a 500 before accepting again.
    pub fail_next_submits: Mutex<u32>,
    /// When set, get-attempt returns a 500.
    pub fail_get: AtomicBool,
    /// remainingSeconds reported by get-attempt.
    pub remaining_seconds: AtomicU64,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            started_papers: Mutex::new(Vec::new()),
            answers_log: Mutex::new(Vec::new()),
            final_answers: Mutex::new(HashMap::new()),
            answer_hits: AtomicUsize::new(0),
            review_hits: AtomicUsize::new(0),
            hard_log: Mutex::new(Vec::new()),
            submit_hits: AtomicUsize::new(0),
            answer_delays_ms: Mutex::new(VecDeque::new()),
            fail_next_answers: Mutex::new(0),
            submit_delays_ms: Mutex::new(VecDeque::new()),
            fail_next_submits: Mutex::new(0),
            fail_get: AtomicBool::new(false),
            remaining_seconds: AtomicU64::new(600),
        }
    }
}

/// The paper every mock attempt serves: an MCQ, a free-text question and a
/// true/false question.
pub fn questions_json() -> Value {
    json!([
        { "id": "q1", "questionType": "MCQ", "text": "Capital of France?",
          "options": ["Lyon", "Paris", "Nice"], "marks": 1 },
        { "id": "q2", "questionType": "TEXT", "text": "Explain photosynthesis.",
          "marks": 4 },
        { "id": "q3", "questionType": "TRUE_FALSE", "text": "The sky is green.",
          "options": ["True", "False"], "marks": 1 }
    ])
}

async fn start(
    State(mock): State<Arc<MockBackend>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let paper_id = body["paperId"].as_str().unwrap_or_default().to_string();
    mock.started_papers.lock().unwrap().push(paper_id);
    Json(json!({ "attemptId": format!("a-{}", uuid::Uuid::new_v4()) }))
}

async fn get_attempt(
    State(mock): State<Arc<MockBackend>>,
    Path(attempt_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if mock.fail_get.load(Ordering::SeqCst) {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "backend unavailable" })),
        ));
    }
    let answers = mock.final_answers.lock().unwrap().clone();
    Ok(Json(json!({
        "attemptId": attempt_id,
        "paperId": "paper-1",
        "questions": questions_json(),
        "answers": answers,
        "remainingSeconds": mock.remaining_seconds.load(Ordering::SeqCst),
    })))
}

async fn answer(
    State(mock): State<Arc<MockBackend>>,
    Path((_attempt_id, question_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    mock.answer_hits.fetch_add(1, Ordering::SeqCst);

    let delay = mock.answer_delays_ms.lock().unwrap().pop_front();
    if let Some(ms) = delay {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    let should_fail = {
        let mut n = mock.fail_next_answers.lock().unwrap();
        if *n > 0 {
            *n -= 1;
            true
        } else {
            false
        }
    };
    if should_fail {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "save rejected" })),
        ));
    }

    let value = body
        .get("selectedOption")
        .cloned()
        .or_else(|| body.get("answerText").cloned())
        .unwrap_or(Value::Null);
    mock.answers_log.lock().unwrap().push((question_id.clone(), body));
    mock.final_answers.lock().unwrap().insert(question_id, value);
    Ok(StatusCode::OK)
}

async fn review(
    State(mock): State<Arc<MockBackend>>,
    Path((_attempt_id, _question_id)): Path<(String, String)>,
) -> StatusCode {
    mock.review_hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn hard(
    State(mock): State<Arc<MockBackend>>,
    Path((_attempt_id, question_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> StatusCode {
    let is_too_hard = body["isTooHard"].as_bool().unwrap_or_default();
    mock.hard_log.lock().unwrap().push((question_id, is_too_hard));
    StatusCode::OK
}

async fn submit(
    State(mock): State<Arc<MockBackend>>,
    Path(_attempt_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    mock.submit_hits.fetch_add(1, Ordering::SeqCst);

    let delay = mock.submit_delays_ms.lock().unwrap().pop_front();
    if let Some(ms) = delay {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    let should_fail = {
        let mut n = mock.fail_next_submits.lock().unwrap();
        if *n > 0 {
            *n -= 1;
            true
        } else {
            false
        }
    };
    if should_fail {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "submit rejected" })),
        ));
    }

    Ok(Json(json!({ "score": 80, "correctCount": 8, "totalQuestions": 10 })))
}

fn router(mock: Arc<MockBackend>) -> Router {
    Router::new()
        .route("/api/v1/attempts/start", post(start))
        .route("/api/v1/attempts/:attempt_id", get(get_attempt))
        .route(
            "/api/v1/attempts/:attempt_id/questions/:question_id/answer",
            post(answer),
        )
        .route(
            "/api/v1/attempts/:attempt_id/questions/:question_id/review",
            post(review),
        )
        .route(
            "/api/v1/attempts/:attempt_id/questions/:question_id/hard",
            post(hard),
        )
        .route("/api/v1/attempts/:attempt_id/submit", post(submit))
        .with_state(mock)
}

pub struct TestBackend {
    pub base_url: String,
    pub mock: Arc<MockBackend>,
}

/// Spawn the mock backend on a random port and return its base URL plus a
/// handle to the recorded state.
pub async fn spawn_backend() -> TestBackend {
    let mock = Arc::new(MockBackend::default());
    let app = router(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let base_url = format!("http://127.0.0.1:{}", port);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestBackend { base_url, mock }
}

pub fn client_for(base_url: &str, cfg: &SyncConfig) -> HubxClient {
    HubxClient::new(base_url, None, cfg.request_timeout()).expect("client builds")
}

/// Poll until `cond` holds or the timeout passes; returns the final state.
pub async fn eventually<F: Fn() -> bool>(cond: F, timeout_ms: u64) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// Per-test config: fast clock, fast retries, and a private snapshot dir
/// wiped before the test starts.
pub fn test_config(name: &str) -> SyncConfig {
    let dir = std::env::temp_dir().join("hubx_exam_sync_it").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    SyncConfig {
        tick_interval_ms: 50,
        request_timeout_secs: 5,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 20,
            max_delay_ms: 100,
            jitter_ms: 5,
        },
        snapshot_dir: dir,
    }
}

pub fn store_for(cfg: &SyncConfig) -> SnapshotStore {
    SnapshotStore::new(cfg.snapshot_dir.clone())
}
