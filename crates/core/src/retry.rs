//! Shared exponential backoff, used by both of the Plan Runner's retry
//! loops (§4.4 Phase 1 planner retries, Phase 2 step retries).
//!
//! Grounded on the teacher's `session::compaction::call_with_retry`,
//! which computes `backoff_ms = initial * multiplier.powi(attempt)`.
//! Generalized here to add the ±10% jitter spec's REDESIGN FLAGS
//! mandate, to avoid pathological retry synchronization under load.

use rand::Rng;
use std::time::Duration;

/// The backoff delay before retry attempt `attempt` (1-based: the delay
/// before the *second* attempt is `attempt == 1`), as
/// `base * 2^(attempt-1)`, jittered by ±10%.
pub fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    let exp = 2u32.saturating_pow(attempt.saturating_sub(1) as u32);
    let nominal = base.saturating_mul(exp);
    jitter(nominal)
}

fn jitter(nominal: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor = rng.random_range(0.9..=1.1);
    Duration::from_secs_f64(nominal.as_secs_f64() * factor)
}
