//! Local attempt snapshots: one JSON file per attempt, keyed `exam:<attemptId>`.
//!
//! The snapshot is a recovery aid, not a source of truth. Every operation
//! here is best-effort: a missing, unreadable, or corrupt file behaves like
//! no snapshot at all, and write failures are logged and swallowed so the
//! caller's state mutation never fails on storage.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::AnswerValue;

/// Storage key for an attempt, shared with other clients of the cache.
pub fn snapshot_key(attempt_id: &str) -> String {
    format!("exam:{}", attempt_id)
}

/// Everything needed to restore an in-progress attempt on the next mount.
/// `flagged` and `ask_teacher` are kept sorted so snapshots of the same
/// state are byte-identical.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSnapshot {
    #[serde(default)]
    pub answers: HashMap<String, AnswerValue>,
    #[serde(default)]
    pub flagged: Vec<String>,
    #[serde(default)]
    pub ask_teacher: Vec<String>,
    #[serde(default)]
    pub current_question_index: usize,
    #[serde(default)]
    pub time_left: u64,
    #[serde(default)]
    pub server_end_time: u64,
}

#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, attempt_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", snapshot_key(attempt_id)))
    }

    /// Load the snapshot for an attempt. Corrupt JSON is treated as absent
    /// (logged once), so a bad file can never wedge an attempt.
    pub fn load(&self, attempt_id: &str) -> Option<AttemptSnapshot> {
        let path = self.path_for(attempt_id);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<AttemptSnapshot>(&raw) {
            Ok(snap) => Some(snap),
            Err(e) => {
                warn!(target: "exam_sync", path = %path.display(), error = %e,
                      "Discarding corrupt attempt snapshot");
                None
            }
        }
    }

    /// Persist the snapshot. Failures are logged and swallowed.
    pub fn save(&self, attempt_id: &str, snap: &AttemptSnapshot) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(target: "exam_sync", dir = %self.dir.display(), error = %e,
                  "Cannot create snapshot dir");
            return;
        }
        let path = self.path_for(attempt_id);
        let raw = match serde_json::to_string(snap) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(target: "exam_sync", %attempt_id, error = %e, "Cannot encode snapshot");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, raw) {
            warn!(target: "exam_sync", path = %path.display(), error = %e,
                  "Cannot write attempt snapshot");
        } else {
            debug!(target: "exam_sync", path = %path.display(), "Snapshot written");
        }
    }

    /// Remove the snapshot (after submit). A missing file is not an error.
    pub fn clear(&self, attempt_id: &str) {
        let path = self.path_for(attempt_id);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(target: "exam_sync", path = %path.display(), "Snapshot cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(target: "exam_sync", path = %path.display(), error = %e,
                            "Cannot remove attempt snapshot"),
        }
    }
}
