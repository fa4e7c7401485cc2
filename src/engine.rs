// Progression engine: XP accrual, administrative grants/resets, rank and leaderboard
// queries on top of a CounterStore.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use crate::cooldown::CooldownTracker;
use crate::db::{CounterStore, XpRow};
use crate::error::BotError;
use crate::metrics;
use crate::progression::{apply_gain, progress_to_next, Progress, XpChange, XP_PER_MESSAGE};

pub const LEADERBOARD_MIN: i64 = 1;
pub const LEADERBOARD_MAX: i64 = 20;
pub const LEADERBOARD_DEFAULT: i64 = 10;

/// Emitted when an accrual or grant moves a member to a higher level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelUp {
    pub guild_id: String,
    pub user_id: String,
    pub level: i64,
}

/// Snapshot of one member's standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankCard {
    pub progress: Progress,
    pub total_xp: i64,
}

impl RankCard {
    pub fn is_maxed(&self) -> bool {
        self.progress.is_maxed()
    }
}

/// Silently bring a requested leaderboard size into [1, 20].
pub fn clamp_leaderboard_limit(limit: i64) -> i64 {
    limit.clamp(LEADERBOARD_MIN, LEADERBOARD_MAX)
}

type MemberKey = (String, String);

/// Per-member async locks so read-modify-write sequences on one counter
/// never interleave. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
struct MemberLocks {
    inner: Mutex<HashMap<MemberKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemberLocks {
    fn handle(&self, key: &MemberKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.clone()).or_default().clone()
    }

    fn release(&self, key: &MemberKey, handle: Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map plus ours: nobody else is waiting.
        if Arc::strong_count(&handle) == 2 {
            map.remove(key);
        }
    }

    async fn with_lock<T, F, Fut>(&self, guild_id: &str, user_id: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let key = (guild_id.to_string(), user_id.to_string());
        let handle = self.handle(&key);
        let result = {
            let _guard = handle.lock().await;
            f().await
        };
        self.release(&key, handle);
        result
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// XP bookkeeping for every guild the bot is in.
pub struct ProgressionEngine {
    store: Arc<dyn CounterStore>,
    cooldowns: CooldownTracker,
    locks: MemberLocks,
}

impl ProgressionEngine {
    pub fn new(store: Arc<dyn CounterStore>, cooldowns: CooldownTracker) -> Self {
        Self {
            store,
            cooldowns,
            locks: MemberLocks::default(),
        }
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    /// Award message XP to a member at `now`.
    ///
    /// Returns `Ok(None)` both when the cooldown rejects the message and when
    /// the member stays on the same level; a rejected call changes nothing.
    pub async fn on_message(
        &self,
        guild_id: &str,
        user_id: &str,
        now: Instant,
    ) -> Result<Option<LevelUp>, BotError> {
        if let Err(active) = self.cooldowns.try_accept(guild_id, user_id, now) {
            metrics::COOLDOWN_REJECTIONS_TOTAL.inc();
            tracing::trace!(guild_id, user_id, "Accrual skipped: {active}");
            return Ok(None);
        }

        let change = self.add_xp(guild_id, user_id, XP_PER_MESSAGE).await?;
        metrics::XP_ACCRUALS_TOTAL.inc();
        Ok(self.level_up_for(guild_id, user_id, &change))
    }

    /// Administrative XP grant. No cooldown; `amount` must be at least 1.
    pub async fn grant_xp(
        &self,
        guild_id: &str,
        user_id: &str,
        amount: i64,
    ) -> Result<XpChange, BotError> {
        if amount < 1 {
            return Err(BotError::Validation("The amount must be >= 1.".to_string()));
        }
        let change = self.add_xp(guild_id, user_id, amount).await?;
        if change.leveled_up() {
            metrics::LEVEL_UPS_TOTAL.inc();
        }
        tracing::info!(
            guild_id,
            user_id,
            amount,
            new_xp = change.new_xp,
            "XP granted"
        );
        Ok(change)
    }

    /// Set a member's XP back to 0.
    pub async fn reset_xp(&self, guild_id: &str, user_id: &str) -> Result<(), BotError> {
        self.locks
            .with_lock(guild_id, user_id, move || self.store.write_xp(guild_id, user_id, 0))
            .await?;
        tracing::info!(guild_id, user_id, "XP reset");
        Ok(())
    }

    pub async fn rank(&self, guild_id: &str, user_id: &str) -> Result<RankCard, BotError> {
        let total_xp = self.store.read_xp(guild_id, user_id).await?;
        Ok(RankCard {
            progress: progress_to_next(total_xp),
            total_xp,
        })
    }

    /// Top members of a guild, highest XP first. `limit` is clamped to [1, 20].
    /// Members with equal XP keep storage order.
    pub async fn leaderboard(&self, guild_id: &str, limit: i64) -> Result<Vec<XpRow>, BotError> {
        let limit = clamp_leaderboard_limit(limit);
        Ok(self.store.top_xp(guild_id, limit).await?)
    }

    /// Members currently inside a read-modify-write (for diagnostics).
    pub fn members_in_flight(&self) -> usize {
        self.locks.len()
    }

    async fn add_xp(&self, guild_id: &str, user_id: &str, amount: i64) -> Result<XpChange, BotError> {
        let change = self
            .locks
            .with_lock(guild_id, user_id, move || async move {
                let current = self.store.read_xp(guild_id, user_id).await?;
                let change = apply_gain(current, amount);
                self.store.write_xp(guild_id, user_id, change.new_xp).await?;
                Ok::<_, sqlx::Error>(change)
            })
            .await?;
        Ok(change)
    }

    fn level_up_for(&self, guild_id: &str, user_id: &str, change: &XpChange) -> Option<LevelUp> {
        if !change.leveled_up() {
            return None;
        }
        metrics::LEVEL_UPS_TOTAL.inc();
        tracing::info!(guild_id, user_id, level = change.new_level, "Level up");
        Some(LevelUp {
            guild_id: guild_id.to_string(),
            user_id: user_id.to_string(),
            level: change.new_level,
        })
    }
}
