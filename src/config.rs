//! Loading sync tuning (clock cadence, retry policy, snapshot dir) from TOML.
//!
//! See `SyncConfig` for the expected schema. Every field has a default, so an
//! empty file (or no file at all) yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Countdown tick cadence in milliseconds. Production wants 1000; tests
  /// shrink it to keep wall-clock time down.
  pub tick_interval_ms: u64,
  /// Per-request timeout for calls to the assessment backend.
  pub request_timeout_secs: u64,
  pub retry: RetryConfig,
  /// Where attempt snapshots are written. One JSON file per attempt.
  pub snapshot_dir: PathBuf,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tick_interval_ms: 1_000,
      request_timeout_secs: 20,
      retry: RetryConfig::default(),
      snapshot_dir: std::env::temp_dir().join("hubx-exam-sync"),
    }
  }
}

impl SyncConfig {
  /// `request_timeout_secs` as a `Duration`, ready to hand to `HubxClient`.
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

/// Backoff schedule for failed writes: delay = min(base * 2^attempt, max)
/// plus up to `jitter_ms` of random spread. A write is dropped (and counted)
/// once `max_attempts` sends have failed.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  pub jitter_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self { max_attempts: 4, base_delay_ms: 250, max_delay_ms: 5_000, jitter_ms: 100 }
  }
}

/// Attempt to load `SyncConfig` from EXAM_SYNC_CONFIG_PATH. On any parsing/IO
/// error, returns None and the caller falls back to defaults.
pub fn load_sync_config_from_env() -> Option<SyncConfig> {
  let path = std::env::var("EXAM_SYNC_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<SyncConfig>(&s) {
      Ok(cfg) => {
        info!(target: "exam_sync", %path, "Loaded sync config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "exam_sync", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "exam_sync", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_toml_yields_defaults() {
    let cfg: SyncConfig = toml::from_str("").unwrap();
    assert_eq!(cfg.tick_interval_ms, 1_000);
    assert_eq!(cfg.retry.max_attempts, 4);
    assert_eq!(cfg.retry.max_delay_ms, 5_000);
  }

  #[test]
  fn partial_toml_overrides_only_named_fields() {
    let cfg: SyncConfig = toml::from_str(
      "tick_interval_ms = 50\n\n[retry]\nmax_attempts = 2\n",
    )
    .unwrap();
    assert_eq!(cfg.tick_interval_ms, 50);
    assert_eq!(cfg.retry.max_attempts, 2);
    // untouched fields keep their defaults
    assert_eq!(cfg.request_timeout_secs, 20);
    assert_eq!(cfg.retry.base_delay_ms, 250);
  }

  #[test]
  fn request_timeout_comes_from_the_configured_seconds() {
    let cfg = SyncConfig { request_timeout_secs: 7, ..SyncConfig::default() };
    assert_eq!(cfg.request_timeout(), Duration::from_secs(7));
  }

  // One test for all the env-var scenarios: tests in this binary run in
  // parallel and EXAM_SYNC_CONFIG_PATH is process-global state.
  #[test]
  fn env_load_falls_back_to_none_on_any_failure() {
    let dir = std::env::temp_dir().join("hubx_exam_sync_cfg_tests");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    // No variable at all.
    std::env::remove_var("EXAM_SYNC_CONFIG_PATH");
    assert!(load_sync_config_from_env().is_none());

    // Variable points at a file that does not exist.
    std::env::set_var("EXAM_SYNC_CONFIG_PATH", dir.join("missing.toml"));
    assert!(load_sync_config_from_env().is_none());

    // Variable points at a file that is not valid for the schema.
    let bad = dir.join("bad.toml");
    std::fs::write(&bad, "tick_interval_ms = \"soon\"\n").unwrap();
    std::env::set_var("EXAM_SYNC_CONFIG_PATH", &bad);
    assert!(load_sync_config_from_env().is_none());

    // A well-formed file loads and overrides the named field.
    let good = dir.join("good.toml");
    std::fs::write(&good, "tick_interval_ms = 250\n").unwrap();
    std::env::set_var("EXAM_SYNC_CONFIG_PATH", &good);
    let cfg = load_sync_config_from_env().expect("well-formed config file");
    assert_eq!(cfg.tick_interval_ms, 250);

    std::env::remove_var("EXAM_SYNC_CONFIG_PATH");
  }
}
