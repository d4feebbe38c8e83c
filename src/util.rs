//! Small utility helpers used across modules.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as milliseconds since the Unix epoch.
/// The countdown derives remaining time from a fixed end timestamp minus
/// this value, never from an elapsed-time counter.
pub fn now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

/// Log-safe truncation for large strings.
/// Free-text answers can be long; logs carry a short prefix only.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let cut = s
    .char_indices()
    .map(|(i, _)| i)
    .take_while(|i| *i <= max)
    .last()
    .unwrap_or(0);
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}
