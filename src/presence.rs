// Rotating presence status.

use std::sync::Arc;
use std::time::Duration;

use crate::platform::{ChatPlatform, SessionInfo};
use crate::progression::{MAX_LEVEL, XP_PER_LEVEL};

pub const DEFAULT_STATUS: &str = "Guarding the server 🛡️";

/// Statuses shown in turn. The last one reflects the current session counts.
pub fn status_messages(session: Option<&SessionInfo>) -> Vec<String> {
    let (guilds, members) = session
        .map(|s| (s.guild_count, s.member_count))
        .unwrap_or((0, 0));
    vec![
        DEFAULT_STATUS.to_string(),
        "/rank • /leaderboard".to_string(),
        format!("Max level {MAX_LEVEL} • {XP_PER_LEVEL} XP/level"),
        format!("{guilds} server(s) • {members} member(s)"),
    ]
}

/// Cycles through a status list, one entry per tick.
#[derive(Debug, Default)]
pub struct PresenceRotator {
    index: usize,
}

impl PresenceRotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next status to show, or None when there is nothing to show.
    pub fn next_status(&mut self, messages: &[String]) -> Option<String> {
        if messages.is_empty() {
            return None;
        }
        let status = messages[self.index % messages.len()].clone();
        self.index = (self.index + 1) % messages.len();
        Some(status)
    }
}

/// Spawn the presence loop. It waits for the first ready session, then
/// pushes the next status every `period`.
pub fn spawn_presence_rotator(
    platform: Arc<dyn ChatPlatform>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        platform.wait_until_ready().await;
        let mut rotator = PresenceRotator::new();
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let session = platform.session();
            let messages = status_messages(session.as_ref());
            let Some(status) = rotator.next_status(&messages) else {
                continue;
            };
            if let Err(e) = platform.set_presence(&status).await {
                tracing::debug!("Presence update skipped: {e}");
            }
        }
    })
}
