//! Domain models for one exam attempt: question kinds, answer values,
//! load phases, sync counters, and the final score summary.

use serde::{Deserialize, Serialize};

/// How a question expects to be answered. Choice-like kinds carry a
/// zero-based option index on the wire; everything else carries text.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionKind {
  /// Single-choice from a fixed option list.
  Mcq,
  /// Two-option choice (options are implicit).
  TrueFalse,
  /// Free text, graded elsewhere.
  Text,
}

impl QuestionKind {
  /// True for kinds whose answer is an option index.
  pub fn is_choice(self) -> bool {
    matches!(self, QuestionKind::Mcq | QuestionKind::TrueFalse)
  }
}

/// One question of the active paper, as delivered by the backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Question {
  pub id: String,
  #[serde(rename = "questionType")]
  pub kind: QuestionKind,
  pub text: String,
  #[serde(default)]
  pub options: Vec<String>,
  #[serde(default)]
  pub marks: u32,
}

/// An answer as held locally and in the snapshot: either a zero-based
/// option index or free text. Untagged so snapshots and the backend's
/// answers map store the raw value (`2` or `"Paris"`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnswerValue {
  Choice(u32),
  Text(String),
}

/// Which of the two load sources the in-memory state currently reflects.
///
/// `Hydrating` means the state was seeded from the local snapshot (or
/// defaults) and is provisional; `Reconciled` means the authoritative
/// server snapshot has been applied.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
  Hydrating,
  Reconciled,
}

/// Observable write-queue accounting. `pending_saves` counts enqueued
/// answer writes not yet acknowledged; `failed_saves` counts writes
/// abandoned after the retry budget was exhausted. A UI can surface the
/// sum as "unsynced changes" instead of losing data silently.
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SyncStatus {
  pub pending_saves: usize,
  pub failed_saves: usize,
}

impl SyncStatus {
  /// True when every enqueued write has been acknowledged.
  pub fn is_clean(&self) -> bool {
    self.pending_saves == 0 && self.failed_saves == 0
  }
}

/// Final grading summary returned by submit. Used as the wire DTO too.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreSummary {
  pub score: u32,
  #[serde(rename = "correctCount")]
  pub correct_count: u32,
  #[serde(rename = "totalQuestions")]
  pub total_questions: u32,
}
