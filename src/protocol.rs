//! Wire DTOs for the assessment backend's REST API (serde ready).
//! Keep this small and stable to evolve client and backend independently.
//!
//! Field names are camelCase on the wire; the answer payload shape is
//! chosen by question kind (`selectedOption` for choice-like questions,
//! `answerText` otherwise).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{AnswerValue, Question, QuestionKind};

/// Body of `POST /attempts/start`.
#[derive(Debug, Serialize)]
pub struct StartIn {
    #[serde(rename = "paperId")]
    pub paper_id: String,
}

/// Response of `POST /attempts/start`.
#[derive(Debug, Deserialize)]
pub struct StartOut {
    #[serde(rename = "attemptId")]
    pub attempt_id: String,
}

/// Response of `GET /attempts/{attemptId}`: the attempt record including
/// prior answers, plus the authoritative remaining time in seconds.
#[derive(Debug, Deserialize)]
pub struct AttemptOut {
    #[serde(rename = "attemptId")]
    pub attempt_id: String,
    #[serde(rename = "paperId")]
    pub paper_id: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: HashMap<String, AnswerValue>,
    #[serde(rename = "remainingSeconds")]
    pub remaining_seconds: u64,
}

/// Body of `POST .../questions/{questionId}/answer`.
///
/// Exactly one of the two shapes is sent, never both.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnswerIn {
    Choice {
        #[serde(rename = "selectedOption")]
        selected_option: u32,
    },
    Text {
        #[serde(rename = "answerText")]
        answer_text: String,
    },
}

impl AnswerIn {
    /// Choose the wire shape for an answer: option index for choice-like
    /// questions answered with an index, text otherwise. A mismatched
    /// pair degrades to text so the write is never dropped.
    pub fn for_question(kind: QuestionKind, value: &AnswerValue) -> Self {
        match value {
            AnswerValue::Choice(i) if kind.is_choice() => AnswerIn::Choice { selected_option: *i },
            AnswerValue::Choice(i) => AnswerIn::Text { answer_text: i.to_string() },
            AnswerValue::Text(s) => AnswerIn::Text { answer_text: s.clone() },
        }
    }
}

/// Body of `POST .../questions/{questionId}/hard`. Carries the new
/// membership state of the "raise doubt" marker.
#[derive(Debug, Serialize, Deserialize)]
pub struct HardIn {
    #[serde(rename = "isTooHard")]
    pub is_too_hard: bool,
}
