//! Global rate-limit cool-down shared by every fetch.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// "No fetch before T" window.
///
/// The deadline is read, compared and updated under one lock so a worker
/// can never slip past a cool-down that another worker just extended.
#[derive(Debug, Default)]
pub struct Cooldown {
    until: Mutex<Option<Instant>>,
}

impl Cooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the window to at least `now + duration`. Never shortens it.
    pub fn trigger(&self, duration: Duration) {
        let candidate = Instant::now() + duration;
        let mut until = self.until.lock().unwrap_or_else(|e| e.into_inner());
        match *until {
            Some(current) if current >= candidate => {}
            _ => *until = Some(candidate),
        }
    }

    /// Time left in the window, clearing it once expired.
    pub fn remaining(&self) -> Option<Duration> {
        let mut until = self.until.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match *until {
            Some(deadline) if deadline > now => Some(deadline - now),
            Some(_) => {
                *until = None;
                None
            }
            None => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.remaining().is_some()
    }

    /// Sleep until no cool-down is active. Re-checks after every sleep since
    /// another worker may have extended the window meanwhile.
    pub async fn wait(&self) {
        while let Some(remaining) = self.remaining() {
            tracing::debug!(remaining_ms = remaining.as_millis() as u64, "Waiting out rate-limit cool-down");
            tokio::time::sleep(remaining).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn trigger_never_shortens_window() {
        let cooldown = Cooldown::new();
        cooldown.trigger(Duration::from_secs(10));
        cooldown.trigger(Duration::from_secs(1));

        let remaining = cooldown.remaining().unwrap();
        assert!(remaining > Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_after_window() {
        let cooldown = Cooldown::new();
        cooldown.trigger(Duration::from_secs(5));

        let start = Instant::now();
        cooldown.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(!cooldown.is_active());
    }

    #[tokio::test]
    async fn inactive_by_default() {
        let cooldown = Cooldown::new();
        assert!(cooldown.remaining().is_none());
        cooldown.wait().await;
    }
}
