//! Runtime configuration for the orchestration core.
//!
//! Field shape and defaults come straight from spec.md §6. Default
//! functions follow the teacher's `agent::config` convention of one
//! `fn default_x() -> T` per field rather than inline literals, so the
//! defaults are reusable from both `#[serde(default = "...")]` and
//! `Default for Config`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_concurrent() -> usize {
    1
}
fn default_queue_cap() -> usize {
    10
}
fn default_max_cache_size() -> usize {
    100
}
fn default_sim_threshold() -> f32 {
    0.95
}
fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_n_max() -> usize {
    10_000
}
fn default_t_plan_secs() -> u64 {
    30
}
fn default_t_step_secs() -> u64 {
    15
}
fn default_t_window_secs() -> u64 {
    5
}
fn default_t_hist_secs() -> u64 {
    2
}
fn default_r_plan() -> usize {
    3
}
fn default_r_step() -> usize {
    3
}
fn default_b_plan_ms() -> u64 {
    1000
}
fn default_b_step_ms() -> u64 {
    1000
}
fn default_sub_buf() -> usize {
    256
}
fn default_t_grace_secs() -> u64 {
    30
}

/// Configuration recognized by the core (spec.md §6).
///
/// Loaded from an optional TOML file by the CLI binary; every field has
/// a default matching the spec, so an empty/missing file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Max concurrent Planning+Running sessions.
    pub max_concurrent: usize,
    /// Admission queue capacity.
    pub queue_cap: usize,
    /// Plan cache entry cap.
    pub max_cache_size: usize,
    /// Cosine-similarity cutoff for a semantic cache hit.
    pub sim_threshold: f32,
    /// Cache entry time-to-live, in seconds.
    pub cache_ttl_secs: u64,
    /// Instruction length cap, in code points, after trimming.
    pub n_max: usize,
    /// Planner RPC timeout, in seconds.
    pub t_plan_secs: u64,
    /// Executor step timeout, in seconds.
    pub t_step_secs: u64,
    /// Window-focus verification timeout, in seconds.
    pub t_window_secs: u64,
    /// History-store append timeout, in seconds.
    pub t_hist_secs: u64,
    /// Planner retry count.
    pub r_plan: usize,
    /// Executor-step retry count.
    pub r_step: usize,
    /// Planner backoff base, in milliseconds.
    pub b_plan_ms: u64,
    /// Executor-step backoff base, in milliseconds.
    pub b_step_ms: u64,
    /// Per-subscriber event-bus buffer size.
    pub sub_buf: usize,
    /// Post-terminal event-bus grace period, in seconds.
    pub t_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_cap: default_queue_cap(),
            max_cache_size: default_max_cache_size(),
            sim_threshold: default_sim_threshold(),
            cache_ttl_secs: default_cache_ttl_secs(),
            n_max: default_n_max(),
            t_plan_secs: default_t_plan_secs(),
            t_step_secs: default_t_step_secs(),
            t_window_secs: default_t_window_secs(),
            t_hist_secs: default_t_hist_secs(),
            r_plan: default_r_plan(),
            r_step: default_r_step(),
            b_plan_ms: default_b_plan_ms(),
            b_step_ms: default_b_step_ms(),
            sub_buf: default_sub_buf(),
            t_grace_secs: default_t_grace_secs(),
        }
    }
}

impl Config {
    /// Parse configuration from a TOML document. Missing fields fall
    /// back to their defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
    pub fn t_plan(&self) -> Duration {
        Duration::from_secs(self.t_plan_secs)
    }
    pub fn t_step(&self) -> Duration {
        Duration::from_secs(self.t_step_secs)
    }
    pub fn t_window(&self) -> Duration {
        Duration::from_secs(self.t_window_secs)
    }
    pub fn t_hist(&self) -> Duration {
        Duration::from_secs(self.t_hist_secs)
    }
    pub fn b_plan(&self) -> Duration {
        Duration::from_millis(self.b_plan_ms)
    }
    pub fn b_step(&self) -> Duration {
        Duration::from_millis(self.b_step_ms)
    }
    pub fn t_grace(&self) -> Duration {
        Duration::from_secs(self.t_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.max_concurrent, 1);
        assert_eq!(cfg.queue_cap, 10);
        assert_eq!(cfg.max_cache_size, 100);
        assert!((cfg.sim_threshold - 0.95).abs() < f32::EPSILON);
        assert_eq!(cfg.cache_ttl_secs, 24 * 60 * 60);
        assert_eq!(cfg.n_max, 10_000);
        assert_eq!(cfg.r_plan, 3);
        assert_eq!(cfg.r_step, 3);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = Config::from_toml("max_concurrent = 4\n").unwrap();
        assert_eq!(cfg.max_concurrent, 4);
        assert_eq!(cfg.queue_cap, 10);
    }
}
