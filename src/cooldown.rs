// In-memory cooldown gate for message accruals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Key for the cooldown map: (guild_id, user_id).
type CooldownKey = (String, String);

/// Returned when an accrual arrives inside the cooldown window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownActive {
    pub remaining: Duration,
}

impl std::fmt::Display for CooldownActive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cooldown active: {}ms remaining", self.remaining.as_millis())
    }
}

/// Thread-safe record of the last accepted accrual per member.
///
/// A zero window disables the gate entirely. State is process-local and
/// starts empty on every restart.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window: Duration,
    inner: Arc<Mutex<HashMap<CooldownKey, Instant>>>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// Accept or reject an accrual at `now`.
    /// On acceptance the timestamp is recorded before returning Ok(()).
    /// Rejections leave the recorded timestamp untouched.
    pub fn try_accept(
        &self,
        guild_id: &str,
        user_id: &str,
        now: Instant,
    ) -> Result<(), CooldownActive> {
        if !self.is_enabled() {
            return Ok(());
        }
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let key = (guild_id.to_string(), user_id.to_string());

        if let Some(last) = map.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.window {
                return Err(CooldownActive {
                    remaining: self.window - elapsed,
                });
            }
        }

        map.insert(key, now);
        Ok(())
    }

    /// Drop entries whose window has already elapsed at `now`.
    pub fn prune(&self, now: Instant) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        let window = self.window;
        map.retain(|_, last| now.saturating_duration_since(*last) < window);
        before - map.len()
    }

    /// Number of tracked members (for diagnostics).
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

/// Spawn a background task that periodically drops expired cooldown entries.
/// Does nothing when the cooldown is disabled.
pub fn spawn_cooldown_sweeper(tracker: CooldownTracker) {
    if !tracker.is_enabled() {
        return;
    }
    let period = tracker.window().max(Duration::from_secs(60));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            let dropped = tracker.prune(Instant::now());
            if dropped > 0 {
                tracing::debug!(dropped, remaining = tracker.tracked(), "Pruned cooldown entries");
            }
        }
    });
}
