//! The exam session coordinator: optimistic in-memory attempt state, a
//! serialized write queue, the countdown clock, and snapshot persistence.
//!
//! This module owns:
//!   - the per-attempt state (answers, flags, navigation, remaining time)
//!   - the FIFO save queue that keeps answer writes in submission order
//!   - the 1 Hz clock anchored to the server end timestamp
//!
//! Every operation here is fire-and-forget from the caller's point of view:
//! network failures are logged and absorbed, never surfaced as errors, so a
//! flaky connection can not take down an exam in progress. What the caller
//! does get is `sync_status()`, which reports writes still pending and
//! writes dropped after the retry budget ran out.
//!
//! Expected flow for a host UI:
//!   1. `ExamSession::start` (new attempt) or `ExamSession::resume`
//!   2. `load_saved_state()` once on mount
//!   3. user-driven calls (`save_answer`, toggles, navigation, `submit`)
//!   4. `close()` on unmount, or just drop the last clone

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{RetryConfig, SyncConfig};
use crate::domain::{AnswerValue, LoadPhase, Question, QuestionKind, ScoreSummary, SyncStatus};
use crate::hubx::{HubxClient, HubxError};
use crate::protocol::AnswerIn;
use crate::snapshot::{AttemptSnapshot, SnapshotStore};
use crate::util::now_ms;

/// One queued answer write. The wire payload is captured at enqueue time so
/// later state changes cannot leak into an earlier task.
#[derive(Clone, Debug)]
struct SaveTask {
    question_id: String,
    body: AnswerIn,
}

/// The queue and its draining guard live together under one mutex so the
/// "is a drain loop already running" decision is atomic with the append.
#[derive(Default)]
struct SaveQueue {
    tasks: VecDeque<SaveTask>,
    draining: bool,
}

struct AttemptState {
    paper_id: String,
    questions: Vec<Question>,
    answers: HashMap<String, AnswerValue>,
    flagged: BTreeSet<String>,
    ask_teacher: BTreeSet<String>,
    current_question_index: usize,
    /// Derived seconds, recomputed from `server_end_time` on every tick.
    time_left: u64,
    /// Authoritative end-of-attempt timestamp in epoch ms, fixed once at
    /// reconcile time. Immune to tick drift by construction.
    server_end_time: u64,
    phase: LoadPhase,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self {
            paper_id: String::new(),
            questions: Vec::new(),
            answers: HashMap::new(),
            flagged: BTreeSet::new(),
            ask_teacher: BTreeSet::new(),
            current_question_index: 0,
            time_left: 0,
            server_end_time: 0,
            phase: LoadPhase::Hydrating,
        }
    }
}

impl AttemptState {
    fn to_snapshot(&self) -> AttemptSnapshot {
        AttemptSnapshot {
            answers: self.answers.clone(),
            flagged: self.flagged.iter().cloned().collect(),
            ask_teacher: self.ask_teacher.iter().cloned().collect(),
            current_question_index: self.current_question_index,
            time_left: self.time_left,
            server_end_time: self.server_end_time,
        }
    }
}

struct SessionInner {
    attempt_id: String,
    client: HubxClient,
    store: SnapshotStore,
    cfg: SyncConfig,
    state: RwLock<AttemptState>,
    queue: Mutex<SaveQueue>,
    pending_saves: AtomicU64,
    failed_saves: AtomicU64,
    /// Submission latch: set exactly once, by whichever of manual submit or
    /// the clock gets there first.
    finished: AtomicBool,
    clock: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.clock.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// One exam attempt's client-side runtime. Cheap to clone; all clones share
/// the same state, queue and clock.
#[derive(Clone)]
pub struct ExamSession {
    inner: Arc<SessionInner>,
}

impl ExamSession {
    /// Build a session around an existing attempt id. No I/O happens until
    /// `load_saved_state` is called.
    pub fn resume(
        client: HubxClient,
        store: SnapshotStore,
        cfg: SyncConfig,
        attempt_id: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                attempt_id: attempt_id.into(),
                client,
                store,
                cfg,
                state: RwLock::new(AttemptState::default()),
                queue: Mutex::new(SaveQueue::default()),
                pending_saves: AtomicU64::new(0),
                failed_saves: AtomicU64::new(0),
                finished: AtomicBool::new(false),
                clock: StdMutex::new(None),
            }),
        }
    }

    /// Start a fresh attempt for `paper_id` and build a session around the
    /// id the backend assigned. This is the one operation that does report
    /// a network error: without an attempt id there is nothing to degrade
    /// into.
    #[instrument(level = "info", skip(client, store, cfg))]
    pub async fn start(
        client: HubxClient,
        store: SnapshotStore,
        cfg: SyncConfig,
        paper_id: &str,
    ) -> Result<Self, HubxError> {
        let out = client.start_attempt(paper_id).await?;
        info!(target: "attempt", attempt_id = %out.attempt_id, %paper_id, "Attempt started");
        Ok(Self::resume(client, store, cfg, out.attempt_id))
    }

    pub fn attempt_id(&self) -> &str {
        &self.inner.attempt_id
    }

    /// Two-phase load. Phase 1 hydrates from the local snapshot so the user
    /// sees their flags, navigation and answers instantly; phase 2 fetches
    /// the authoritative record and overwrites answers and remaining time.
    /// Locally-seeded flags and navigation survive reconciliation (the
    /// backend does not echo them back). On fetch failure the hydrated (or
    /// default) values stand and the phase stays `Hydrating`.
    #[instrument(level = "info", skip(self), fields(attempt_id = %self.inner.attempt_id))]
    pub async fn load_saved_state(&self) {
        if self.inner.finished.load(Ordering::SeqCst) {
            return;
        }

        if let Some(snap) = self.inner.store.load(&self.inner.attempt_id) {
            let mut st = self.inner.state.write().await;
            st.answers = snap.answers;
            st.flagged = snap.flagged.into_iter().collect();
            st.ask_teacher = snap.ask_teacher.into_iter().collect();
            st.current_question_index = snap.current_question_index;
            st.time_left = snap.time_left;
            st.server_end_time = snap.server_end_time;
            info!(target: "attempt", attempt_id = %self.inner.attempt_id,
                  answers = st.answers.len(), flagged = st.flagged.len(),
                  "Hydrated from local snapshot");
        }

        match self.inner.client.get_attempt(&self.inner.attempt_id).await {
            Ok(out) => {
                let mut st = self.inner.state.write().await;
                st.paper_id = out.paper_id;
                st.questions = out.questions;
                st.answers = out.answers;
                st.server_end_time =
                    now_ms().saturating_add(out.remaining_seconds.saturating_mul(1_000));
                st.time_left = out.remaining_seconds;
                // A snapshot from an older version of the paper can point
                // past the end; fall back to the first question.
                if st.current_question_index >= st.questions.len() {
                    st.current_question_index = 0;
                }
                st.phase = LoadPhase::Reconciled;
                info!(target: "attempt", attempt_id = %self.inner.attempt_id,
                      questions = st.questions.len(), remaining_s = st.time_left,
                      "Reconciled with backend");
                drop(st);
                self.start_clock();
            }
            Err(e) => {
                warn!(target: "attempt", attempt_id = %self.inner.attempt_id, error = %e,
                      "Backend fetch failed; continuing on local state");
            }
        }
    }

    /// Record an answer. The in-memory value and the snapshot update first
    /// (optimistic, visible before any network round trip), then exactly
    /// one task joins the write queue. A failed write never rolls the local
    /// value back; it surfaces through `sync_status()` instead.
    #[instrument(level = "debug", skip(self, value),
                 fields(attempt_id = %self.inner.attempt_id, %question_id))]
    pub async fn save_answer(&self, question_id: &str, value: AnswerValue, kind: QuestionKind) {
        let body = AnswerIn::for_question(kind, &value);
        let snap = {
            let mut st = self.inner.state.write().await;
            st.answers.insert(question_id.to_string(), value);
            st.to_snapshot()
        };
        self.inner.store.save(&self.inner.attempt_id, &snap);
        self.inner.pending_saves.fetch_add(1, Ordering::SeqCst);
        self.enqueue(SaveTask { question_id: question_id.to_string(), body }).await;
    }

    /// Toggle the "review later" flag. Optimistic toggle + snapshot, then a
    /// fire-and-forget notification. Flag notifications are not routed
    /// through the write queue: they touch a server field disjoint from
    /// answers and may race freely.
    #[instrument(level = "debug", skip(self),
                 fields(attempt_id = %self.inner.attempt_id, %question_id))]
    pub async fn toggle_flag(&self, question_id: &str) {
        let (snap, now_flagged) = {
            let mut st = self.inner.state.write().await;
            let now_flagged = if st.flagged.remove(question_id) {
                false
            } else {
                st.flagged.insert(question_id.to_string());
                true
            };
            (st.to_snapshot(), now_flagged)
        };
        self.inner.store.save(&self.inner.attempt_id, &snap);
        debug!(target: "attempt", attempt_id = %self.inner.attempt_id, %question_id,
               now_flagged, "Review flag toggled");

        let inner = Arc::clone(&self.inner);
        let qid = question_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = inner.client.mark_review(&inner.attempt_id, &qid).await {
                warn!(target: "attempt", attempt_id = %inner.attempt_id, question_id = %qid,
                      error = %e, "Review notification failed");
            }
        });
    }

    /// Toggle the "raise doubt to the teacher" marker. Same shape as
    /// `toggle_flag`, except the notification carries the new membership
    /// state explicitly.
    #[instrument(level = "debug", skip(self),
                 fields(attempt_id = %self.inner.attempt_id, %question_id))]
    pub async fn toggle_ask_teacher(&self, question_id: &str) {
        let (snap, is_too_hard) = {
            let mut st = self.inner.state.write().await;
            let is_too_hard = if st.ask_teacher.remove(question_id) {
                false
            } else {
                st.ask_teacher.insert(question_id.to_string());
                true
            };
            (st.to_snapshot(), is_too_hard)
        };
        self.inner.store.save(&self.inner.attempt_id, &snap);
        debug!(target: "attempt", attempt_id = %self.inner.attempt_id, %question_id,
               is_too_hard, "Ask-teacher marker toggled");

        let inner = Arc::clone(&self.inner);
        let qid = question_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = inner.client.mark_hard(&inner.attempt_id, &qid, is_too_hard).await {
                warn!(target: "attempt", attempt_id = %inner.attempt_id, question_id = %qid,
                      error = %e, "Ask-teacher notification failed");
            }
        });
    }

    /// Navigate to a question. Out-of-range indices are silently ignored:
    /// navigation must never take down the exam view.
    #[instrument(level = "debug", skip(self),
                 fields(attempt_id = %self.inner.attempt_id, index))]
    pub async fn set_question_index(&self, index: usize) {
        let snap = {
            let mut st = self.inner.state.write().await;
            if index >= st.questions.len() {
                debug!(target: "attempt", attempt_id = %self.inner.attempt_id, index,
                       total = st.questions.len(), "Ignoring out-of-range question index");
                return;
            }
            st.current_question_index = index;
            st.to_snapshot()
        };
        self.inner.store.save(&self.inner.attempt_id, &snap);
    }

    /// Submit the attempt for grading. On success the snapshot is cleared,
    /// the clock stops and the session is finished for good; any later
    /// submit (manual or clock-fired) is a no-op. On failure the latch
    /// reopens so the user can try again, and `None` is returned.
    #[instrument(level = "info", skip(self), fields(attempt_id = %self.inner.attempt_id))]
    pub async fn submit(&self) -> Option<ScoreSummary> {
        if self.inner.finished.swap(true, Ordering::SeqCst) {
            debug!(target: "attempt", attempt_id = %self.inner.attempt_id,
                   "Submit ignored; attempt already finished");
            return None;
        }
        match self.inner.client.submit_attempt(&self.inner.attempt_id).await {
            Ok(summary) => {
                self.inner.store.clear(&self.inner.attempt_id);
                self.stop_clock();
                info!(target: "attempt", attempt_id = %self.inner.attempt_id,
                      score = summary.score, correct = summary.correct_count,
                      total = summary.total_questions, "Attempt submitted");
                Some(summary)
            }
            Err(e) => {
                self.inner.finished.store(false, Ordering::SeqCst);
                error!(target: "attempt", attempt_id = %self.inner.attempt_id, error = %e,
                       "Submit failed; attempt stays open");
                None
            }
        }
    }

    /// Stop the countdown. Queued writes still in flight are left to
    /// resolve in the background (each drain loop holds its own reference).
    /// Also runs when the last clone of the session drops.
    pub fn close(&self) {
        self.stop_clock();
    }

    // --- Accessors ---

    pub async fn phase(&self) -> LoadPhase {
        self.inner.state.read().await.phase
    }

    /// Remaining whole seconds as of the last tick (or reconcile).
    pub async fn time_left(&self) -> u64 {
        self.inner.state.read().await.time_left
    }

    pub async fn answer(&self, question_id: &str) -> Option<AnswerValue> {
        self.inner.state.read().await.answers.get(question_id).cloned()
    }

    pub async fn is_flagged(&self, question_id: &str) -> bool {
        self.inner.state.read().await.flagged.contains(question_id)
    }

    pub async fn is_ask_teacher(&self, question_id: &str) -> bool {
        self.inner.state.read().await.ask_teacher.contains(question_id)
    }

    pub async fn current_question_index(&self) -> usize {
        self.inner.state.read().await.current_question_index
    }

    pub async fn questions(&self) -> Vec<Question> {
        self.inner.state.read().await.questions.clone()
    }

    pub async fn paper_id(&self) -> String {
        self.inner.state.read().await.paper_id.clone()
    }

    /// Write-queue accounting: answers not yet acknowledged plus answers
    /// dropped after the retry budget ran out.
    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus {
            pending_saves: self.inner.pending_saves.load(Ordering::SeqCst) as usize,
            failed_saves: self.inner.failed_saves.load(Ordering::SeqCst) as usize,
        }
    }

    pub fn finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    // --- Write queue ---

    /// Append a task and start the drain loop iff none is running.
    async fn enqueue(&self, task: SaveTask) {
        let mut q = self.inner.queue.lock().await;
        q.tasks.push_back(task);
        if !q.draining {
            q.draining = true;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { drain_queue(inner).await });
        }
    }

    // --- Countdown clock ---

    /// (Re)start the ticker. The task holds only a weak reference so an
    /// abandoned session can actually drop; each tick either upgrades or
    /// exits. The loop ends when the session is gone, when `stop_clock`
    /// aborts it, or once a tick reports the attempt auto-submitted. It
    /// must NOT end just because the `finished` latch is held: a manual
    /// submit holds it for a whole round trip and reopens it on failure.
    fn start_clock(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = Duration::from_millis(self.inner.cfg.tick_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of a tokio interval completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { return };
                if tick_once(&inner, now_ms()).await {
                    return;
                }
            }
        });
        if let Ok(mut slot) = self.inner.clock.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        } else {
            handle.abort();
        }
    }

    fn stop_clock(&self) {
        if let Ok(mut slot) = self.inner.clock.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Pop and run tasks until the queue is empty, then clear the guard. At
/// most one of these loops exists per session, so at most one answer write
/// is in flight at a time and submission order is preserved.
async fn drain_queue(inner: Arc<SessionInner>) {
    loop {
        let task = {
            let mut q = inner.queue.lock().await;
            match q.tasks.pop_front() {
                Some(task) => task,
                None => {
                    q.draining = false;
                    return;
                }
            }
        };
        run_save(&inner, task).await;
    }
}

/// One answer write with bounded exponential backoff. On success the
/// pending counter goes down; once the retry budget is exhausted the write
/// is dropped, the failed counter goes up, and the drain loop moves on so
/// a newer write for the same question still lands (and lands last).
async fn run_save(inner: &SessionInner, task: SaveTask) {
    let retry = &inner.cfg.retry;
    let mut attempt = 0u32;
    loop {
        match inner
            .client
            .answer_question(&inner.attempt_id, &task.question_id, &task.body)
            .await
        {
            Ok(()) => {
                inner.pending_saves.fetch_sub(1, Ordering::SeqCst);
                debug!(target: "attempt", attempt_id = %inner.attempt_id,
                       question_id = %task.question_id, "Answer persisted");
                return;
            }
            Err(e) if attempt + 1 < retry.max_attempts.max(1) => {
                let delay = backoff_delay(retry, attempt);
                warn!(target: "attempt", attempt_id = %inner.attempt_id,
                      question_id = %task.question_id, attempt,
                      delay_ms = delay.as_millis() as u64, error = %e,
                      "Answer save failed; backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                inner.pending_saves.fetch_sub(1, Ordering::SeqCst);
                inner.failed_saves.fetch_add(1, Ordering::SeqCst);
                error!(target: "attempt", attempt_id = %inner.attempt_id,
                       question_id = %task.question_id, attempts = attempt + 1, error = %e,
                       "Answer save dropped after retries");
                return;
            }
        }
    }
}

/// delay = min(base * 2^attempt, cap) + uniform jitter.
fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let exp = retry.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
    let capped = exp.min(retry.max_delay_ms);
    let jitter = if retry.jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=retry.jitter_ms)
    };
    Duration::from_millis(capped.saturating_add(jitter))
}

/// One countdown step against `now` (epoch ms). `time_left` is recomputed
/// from the fixed end timestamp, so missed or delayed ticks can not stretch
/// the exam. Auto-submit fires only on the observed transition from
/// positive to zero: if the backend already reported zero at reconcile the
/// attempt was expired server-side and we never fire. Returns true once the
/// attempt has been auto-submitted and the clock can stop.
///
/// A tick that lands while a manual submit holds the `finished` latch is
/// skipped, not consumed: the submit either settles the attempt (and stops
/// the clock) or reopens the latch on failure, and the next tick then
/// observes the same expiry.
async fn tick_once(inner: &Arc<SessionInner>, now: u64) -> bool {
    if inner.finished.load(Ordering::SeqCst) {
        return false;
    }
    let fire = {
        let mut st = inner.state.write().await;
        let left = st.server_end_time.saturating_sub(now) / 1000;
        if st.time_left > 0 && left == 0 {
            // Claim the latch before committing the transition. If a manual
            // submit won it in the meantime, leave `time_left` untouched so
            // the expiry stays observable after that submit fails.
            if inner.finished.swap(true, Ordering::SeqCst) {
                return false;
            }
            st.time_left = 0;
            true
        } else {
            st.time_left = left;
            false
        }
    };
    if fire {
        auto_submit(inner).await;
    }
    fire
}

/// Clock-fired submission; the caller has already taken the `finished`
/// latch. The snapshot is cleared whether or not the post lands: the
/// attempt is over either way and stale local state must not resurrect it
/// on the next mount. No retry here; the backend closes out expired
/// attempts on its own.
async fn auto_submit(inner: &Arc<SessionInner>) {
    info!(target: "attempt", attempt_id = %inner.attempt_id, "Time expired; auto-submitting");
    match inner.client.submit_attempt(&inner.attempt_id).await {
        Ok(summary) => {
            info!(target: "attempt", attempt_id = %inner.attempt_id,
                  score = summary.score, correct = summary.correct_count,
                  "Auto-submit accepted");
        }
        Err(e) => {
            error!(target: "attempt", attempt_id = %inner.attempt_id, error = %e,
                   "Auto-submit failed");
        }
    }
    inner.store.clear(&inner.attempt_id);
}
