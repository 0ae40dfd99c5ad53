//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Backoff before retry number `retry` (1-based).
pub fn backoff_for(config: &RetryConfig, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1) as i32;
    let base_ms = config.initial_backoff.as_millis() as f64 * config.backoff_multiplier.powi(exponent);
    let capped_ms = base_ms.min(config.max_backoff.as_millis() as f64);
    apply_jitter(Duration::from_millis(capped_ms as u64), config.jitter)
}

fn apply_jitter(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}
