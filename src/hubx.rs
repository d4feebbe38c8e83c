//! Minimal client for the Hubx assessment backend.
//!
//! We only call the attempt-lifecycle endpoints: start, fetch, the three
//! per-question writes (answer / review / hard), and submit. Calls are
//! instrumented and log ids and latencies (not answer contents).
//!
//! NOTE: We never log the API token and we keep error-body truncations short
//! to avoid leaking exam material into logs.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::SyncConfig;
use crate::domain::ScoreSummary;
use crate::protocol::{AnswerIn, AttemptOut, HardIn, StartIn, StartOut};
use crate::util::trunc_for_log;

#[derive(Debug, Error)]
pub enum HubxError {
  /// Connect/timeout/body errors from the HTTP layer. Retryable.
  #[error("transport: {0}")]
  Transport(#[from] reqwest::Error),
  /// Non-2xx response; `message` is the backend's error string when it sent
  /// one, otherwise the raw body.
  #[error("backend HTTP {status}: {message}")]
  Status { status: reqwest::StatusCode, message: String },
}

#[derive(Clone)]
pub struct HubxClient {
  pub client: reqwest::Client,
  pub base_url: String,
  pub api_token: Option<String>,
}

impl HubxClient {
  pub fn new(
    base_url: impl Into<String>,
    api_token: Option<String>,
    request_timeout: Duration,
  ) -> Result<Self, HubxError> {
    let client = reqwest::Client::builder().timeout(request_timeout).build()?;
    let base_url = base_url.into().trim_end_matches('/').to_string();
    Ok(Self { client, base_url, api_token })
  }

  /// Construct the client if we find HUBX_BASE_URL; otherwise return None.
  /// HUBX_API_TOKEN is optional (local backends run without auth). The
  /// request timeout comes from the sync config's `request_timeout_secs`.
  pub fn from_env(cfg: &SyncConfig) -> Option<Self> {
    let base_url = std::env::var("HUBX_BASE_URL").ok()?;
    let api_token = std::env::var("HUBX_API_TOKEN").ok();
    Self::new(base_url, api_token, cfg.request_timeout()).ok()
  }

  fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
    let mut req = self
      .client
      .request(method, url)
      .header(USER_AGENT, "hubx-exam-sync/0.1")
      .header(CONTENT_TYPE, "application/json");
    if let Some(token) = &self.api_token {
      req = req.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    req
  }

  async fn ensure_success(res: reqwest::Response) -> Result<reqwest::Response, HubxError> {
    if res.status().is_success() {
      return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    // Proxies can hand back whole HTML pages; keep the fallback short.
    let message = extract_hubx_error(&body).unwrap_or_else(|| trunc_for_log(&body, 300));
    Err(HubxError::Status { status, message })
  }

  async fn get_json<T: for<'a> Deserialize<'a>>(&self, url: &str) -> Result<T, HubxError> {
    let res = self.request(reqwest::Method::GET, url).send().await?;
    let res = Self::ensure_success(res).await?;
    Ok(res.json::<T>().await?)
  }

  async fn post_json<B: serde::Serialize, T: for<'a> Deserialize<'a>>(
    &self,
    url: &str,
    body: &B,
  ) -> Result<T, HubxError> {
    let res = self.request(reqwest::Method::POST, url).json(body).send().await?;
    let res = Self::ensure_success(res).await?;
    Ok(res.json::<T>().await?)
  }

  /// POST with optional body where we only care that the backend said 2xx.
  async fn post_ok<B: serde::Serialize>(&self, url: &str, body: Option<&B>) -> Result<(), HubxError> {
    let mut req = self.request(reqwest::Method::POST, url);
    if let Some(b) = body {
      req = req.json(b);
    }
    let res = req.send().await?;
    Self::ensure_success(res).await?;
    Ok(())
  }

  // --- Attempt lifecycle endpoints ---

  /// Create a new attempt for a paper. Returns the server-assigned attempt id.
  #[instrument(level = "info", skip(self))]
  pub async fn start_attempt(&self, paper_id: &str) -> Result<StartOut, HubxError> {
    let url = format!("{}/api/v1/attempts/start", self.base_url);
    let body = StartIn { paper_id: paper_id.to_string() };
    self.post_json(&url, &body).await
  }

  /// Fetch the authoritative attempt record: questions, previously persisted
  /// answers, and the remaining time in seconds.
  #[instrument(level = "info", skip(self))]
  pub async fn get_attempt(&self, attempt_id: &str) -> Result<AttemptOut, HubxError> {
    let url = format!("{}/api/v1/attempts/{}", self.base_url, attempt_id);
    self.get_json(&url).await
  }

  /// Persist one answer. The payload shape was already chosen by question
  /// kind (see `AnswerIn::for_question`).
  #[instrument(level = "info", skip(self, body),
               fields(is_choice = matches!(body, AnswerIn::Choice { .. })))]
  pub async fn answer_question(
    &self,
    attempt_id: &str,
    question_id: &str,
    body: &AnswerIn,
  ) -> Result<(), HubxError> {
    let url = format!(
      "{}/api/v1/attempts/{}/questions/{}/answer",
      self.base_url, attempt_id, question_id
    );
    self.post_ok(&url, Some(body)).await
  }

  /// Notify the backend that the review flag toggled for a question.
  #[instrument(level = "info", skip(self))]
  pub async fn mark_review(&self, attempt_id: &str, question_id: &str) -> Result<(), HubxError> {
    let url = format!(
      "{}/api/v1/attempts/{}/questions/{}/review",
      self.base_url, attempt_id, question_id
    );
    self.post_ok::<()>(&url, None).await
  }

  /// Notify the backend of the new "ask teacher" state for a question.
  #[instrument(level = "info", skip(self))]
  pub async fn mark_hard(
    &self,
    attempt_id: &str,
    question_id: &str,
    is_too_hard: bool,
  ) -> Result<(), HubxError> {
    let url = format!(
      "{}/api/v1/attempts/{}/questions/{}/hard",
      self.base_url, attempt_id, question_id
    );
    self.post_ok(&url, Some(&HardIn { is_too_hard })).await
  }

  /// Submit the attempt for grading and return the score summary.
  #[instrument(level = "info", skip(self))]
  pub async fn submit_attempt(&self, attempt_id: &str) -> Result<ScoreSummary, HubxError> {
    let url = format!("{}/api/v1/attempts/{}/submit", self.base_url, attempt_id);
    let start = std::time::Instant::now();
    let out: ScoreSummary = self.post_json(&url, &serde_json::json!({})).await?;
    info!(
      score = out.score,
      correct = out.correct_count,
      total = out.total_questions,
      elapsed = ?start.elapsed(),
      "Attempt submitted"
    );
    Ok(out)
  }
}

/// Try to extract a clean error message from a backend error body.
/// The backend wraps errors as `{"error": "..."}`.
fn extract_hubx_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error),
    Err(_) => None,
  }
}
