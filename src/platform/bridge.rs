// Gateway bridge: a ChatPlatform backed by an out-of-process gateway client that
// talks to us over the /ws/gateway websocket using JSON frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use super::{ChatPlatform, CommandSpec, GuildMessage, Interaction, SessionInfo, SlashCommand};
use crate::error::BotError;

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Frames sent from the bot to the gateway client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OutboundFrame {
    SendMessage {
        channel_id: String,
        content: String,
    },
    Respond {
        interaction: Interaction,
        content: String,
        ephemeral: bool,
    },
    Defer {
        interaction: Interaction,
        ephemeral: bool,
    },
    FollowUp {
        interaction: Interaction,
        content: String,
        ephemeral: bool,
    },
    SetPresence {
        status: String,
    },
    SyncCommands {
        request_id: String,
        commands: Vec<CommandSpec>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFailureKind {
    SignatureMismatch,
    Other,
}

/// Frames sent from the gateway client to the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InboundFrame {
    Ready(SessionInfo),
    Stats(SessionInfo),
    Message(GuildMessage),
    Command(SlashCommand),
    SyncResult {
        request_id: String,
        count: usize,
    },
    SyncFailed {
        request_id: String,
        kind: SyncFailureKind,
        #[serde(default)]
        detail: String,
    },
}

/// Work the bot has to do after a frame was absorbed by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Ready,
    Message(GuildMessage),
    Command(SlashCommand),
}

type SyncOutcome = Result<usize, BotError>;

const OUTBOUND_BUFFER: usize = 256;

/// The socket currently allowed to carry outbound frames.
struct ActiveConnection {
    id: u64,
    frames: mpsc::Sender<String>,
}

/// Handed to a freshly authenticated gateway socket.
pub struct GatewayConnection {
    pub id: u64,
    /// Outbound frames for this socket. Closes once a newer socket takes over.
    pub frames: mpsc::Receiver<String>,
}

pub struct GatewayBridge {
    active: Mutex<Option<ActiveConnection>>,
    next_connection_id: AtomicU64,
    session: watch::Sender<Option<SessionInfo>>,
    pending_syncs: Mutex<HashMap<String, oneshot::Sender<SyncOutcome>>>,
    sync_timeout: Duration,
}

impl GatewayBridge {
    pub fn new(sync_timeout: Duration) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            active: Mutex::new(None),
            next_connection_id: AtomicU64::new(1),
            session,
            pending_syncs: Mutex::new(HashMap::new()),
            sync_timeout,
        }
    }

    /// Make a new socket the only receiver of outbound frames. Any previous
    /// socket loses its outbound channel.
    pub fn connect(&self) -> GatewayConnection {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let previous = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(ActiveConnection { id, frames: tx });
        if let Some(previous) = previous {
            tracing::warn!(
                old = previous.id,
                new = id,
                "Gateway reconnected, superseding the previous socket"
            );
        }
        GatewayConnection { id, frames: rx }
    }

    pub fn is_current(&self, connection_id: u64) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|c| c.id == connection_id)
    }

    /// Absorb one inbound text frame. Session updates and sync replies are
    /// handled here; events the bot must act on are returned.
    pub fn handle_frame(&self, text: &str) -> Result<Option<GatewayEvent>, serde_json::Error> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        let event = match frame {
            InboundFrame::Ready(info) => {
                tracing::info!(
                    bot_user = %info.bot_user,
                    latency_ms = info.latency_ms,
                    guilds = info.guild_count,
                    "Gateway ready"
                );
                self.session.send_replace(Some(info));
                Some(GatewayEvent::Ready)
            }
            InboundFrame::Stats(info) => {
                self.session.send_replace(Some(info));
                None
            }
            InboundFrame::Message(msg) => Some(GatewayEvent::Message(msg)),
            InboundFrame::Command(cmd) => Some(GatewayEvent::Command(cmd)),
            InboundFrame::SyncResult { request_id, count } => {
                self.complete_sync(&request_id, Ok(count));
                None
            }
            InboundFrame::SyncFailed {
                request_id,
                kind,
                detail,
            } => {
                let err = match kind {
                    SyncFailureKind::SignatureMismatch => BotError::SignatureMismatch(detail),
                    SyncFailureKind::Other => BotError::Platform(detail),
                };
                self.complete_sync(&request_id, Err(err));
                None
            }
        };
        Ok(event)
    }

    /// Forget the session once the gateway socket `connection_id` went away.
    /// A superseded socket closing leaves the current one untouched.
    pub fn mark_disconnected(&self, connection_id: u64) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.as_ref().is_some_and(|c| c.id == connection_id) {
            return false;
        }
        *active = None;
        self.session.send_replace(None);
        true
    }

    pub fn pending_syncs(&self) -> usize {
        self.pending_syncs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn complete_sync(&self, request_id: &str, outcome: SyncOutcome) {
        let waiter = self
            .pending_syncs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::warn!(request_id, "Sync reply for unknown request"),
        }
    }

    fn send(&self, frame: &OutboundFrame) -> Result<(), BotError> {
        let text = serde_json::to_string(frame)
            .map_err(|e| BotError::Platform(format!("failed to encode frame: {e}")))?;
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let Some(conn) = active.as_ref() else {
            return Err(BotError::Platform("no gateway connected".to_string()));
        };
        conn.frames.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BotError::Platform("gateway outbound buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                BotError::Platform("no gateway connected".to_string())
            }
        })
    }
}

impl Default for GatewayBridge {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_TIMEOUT)
    }
}

#[async_trait]
impl ChatPlatform for GatewayBridge {
    async fn send_channel_message(&self, channel_id: &str, text: &str) -> Result<(), BotError> {
        self.send(&OutboundFrame::SendMessage {
            channel_id: channel_id.to_string(),
            content: text.to_string(),
        })
    }

    async fn respond(
        &self,
        interaction: &Interaction,
        text: &str,
        ephemeral: bool,
    ) -> Result<(), BotError> {
        self.send(&OutboundFrame::Respond {
            interaction: interaction.clone(),
            content: text.to_string(),
            ephemeral,
        })
    }

    async fn defer(&self, interaction: &Interaction, ephemeral: bool) -> Result<(), BotError> {
        self.send(&OutboundFrame::Defer {
            interaction: interaction.clone(),
            ephemeral,
        })
    }

    async fn follow_up(
        &self,
        interaction: &Interaction,
        text: &str,
        ephemeral: bool,
    ) -> Result<(), BotError> {
        self.send(&OutboundFrame::FollowUp {
            interaction: interaction.clone(),
            content: text.to_string(),
            ephemeral,
        })
    }

    async fn set_presence(&self, status: &str) -> Result<(), BotError> {
        self.send(&OutboundFrame::SetPresence {
            status: status.to_string(),
        })
    }

    async fn sync_commands(&self, commands: &[CommandSpec]) -> Result<usize, BotError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending_syncs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), tx);

        let sent = self.send(&OutboundFrame::SyncCommands {
            request_id: request_id.clone(),
            commands: commands.to_vec(),
        });
        if let Err(e) = sent {
            self.pending_syncs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.sync_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BotError::Platform("sync request dropped".to_string())),
            Err(_) => {
                self.pending_syncs
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&request_id);
                Err(BotError::Platform(format!(
                    "no sync reply within {}s",
                    self.sync_timeout.as_secs()
                )))
            }
        }
    }

    fn session(&self) -> Option<SessionInfo> {
        self.session.borrow().clone()
    }

    async fn wait_until_ready(&self) {
        let mut rx = self.session.subscribe();
        // The sender lives as long as the bridge, so this only returns once ready.
        let _ = rx.wait_for(|s| s.is_some()).await;
    }
}
