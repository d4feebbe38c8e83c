//! Hubx · Exam Attempt Sync Client
//!
//! The client-side runtime a Hubx exam UI embeds, one `ExamSession` per
//! active attempt:
//! - optimistic in-memory attempt state (answers, flags, navigation, timer)
//! - serialized FIFO write queue with bounded backoff, so answer writes
//!   reach the backend in submission order
//! - local JSON snapshots (keyed `exam:<attemptId>`) for crash/refresh
//!   recovery
//! - 1 Hz countdown anchored to the server end timestamp, with exactly-once
//!   auto-submit on expiry
//!
//! Important env variables:
//!   HUBX_BASE_URL         : enables `HubxClient::from_env` if present
//!   HUBX_API_TOKEN        : optional bearer token for the backend
//!   EXAM_SYNC_CONFIG_PATH : path to TOML config (timers, retry, snapshots)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

pub mod telemetry;
pub mod util;
pub mod domain;
pub mod config;
pub mod protocol;
pub mod hubx;
pub mod snapshot;
pub mod session;

pub use config::{load_sync_config_from_env, RetryConfig, SyncConfig};
pub use domain::{AnswerValue, LoadPhase, Question, QuestionKind, ScoreSummary, SyncStatus};
pub use hubx::{HubxClient, HubxError};
pub use session::ExamSession;
pub use snapshot::{snapshot_key, AttemptSnapshot, SnapshotStore};
