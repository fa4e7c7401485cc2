// Slash command registry and dispatch, plus the guild message handler.
//
// Every command goes through `Bot::handle_command`, which converts any failure
// into one ephemeral reply and a log line.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::db::XpRow;
use crate::engine::{LevelUp, ProgressionEngine, RankCard, LEADERBOARD_DEFAULT};
use crate::error::BotError;
use crate::metrics;
use crate::platform::{
    ChatPlatform, CommandSpec, GuildMessage, Interaction, OptionKind, OptionSpec,
    RequiredPermission, SlashCommand,
};
use crate::presence::DEFAULT_STATUS;
use crate::progression::{level_from_xp, MAX_XP};

pub const DEFAULT_GRANT_AMOUNT: i64 = 1000;

/// Upper bound on cached display names. Past it, an arbitrary entry is evicted.
pub const MAX_CACHED_NAMES: usize = 10_000;

fn option(name: &str, description: &str, kind: OptionKind, required: bool) -> OptionSpec {
    OptionSpec {
        name: name.to_string(),
        description: description.to_string(),
        kind,
        required,
    }
}

fn command(
    name: &str,
    description: &str,
    options: Vec<OptionSpec>,
    required_permission: Option<RequiredPermission>,
) -> CommandSpec {
    CommandSpec {
        name: name.to_string(),
        description: description.to_string(),
        options,
        required_permission,
    }
}

/// The full command set registered with the platform.
pub fn command_registry() -> Vec<CommandSpec> {
    vec![
        command(
            "rank",
            "Show your level and XP",
            vec![option(
                "user",
                "See another member's rank (optional)",
                OptionKind::User,
                false,
            )],
            None,
        ),
        command(
            "leaderboard",
            "Server XP leaderboard",
            vec![option("limit", "Number of entries (1-20)", OptionKind::Integer, false)],
            None,
        ),
        command("ping", "Show the bot latency", vec![], None),
        command(
            "givexp",
            "Give XP to a member (admin)",
            vec![
                option("user", "Member to reward", OptionKind::User, true),
                option("amount", "Amount of XP (>=1)", OptionKind::Integer, false),
            ],
            Some(RequiredPermission::ManageGuild),
        ),
        command(
            "clearxp",
            "Reset a member's XP (admin)",
            vec![option("user", "Member to reset", OptionKind::User, true)],
            Some(RequiredPermission::ManageGuild),
        ),
        command(
            "resync",
            "Force a command resync (admin)",
            vec![],
            Some(RequiredPermission::Administrator),
        ),
        command("debug", "Quick bot diagnostics", vec![], None),
    ]
}

// ── Reply formatting ─────────────────────────────────────────────────

pub fn level_up_text(user_id: &str, level: i64) -> String {
    format!("🎉 <@{user_id}> reached **level {level}**!")
}

pub fn rank_text(display_name: &str, card: &RankCard) -> String {
    let p = &card.progress;
    if card.is_maxed() {
        format!(
            "🏅 **{display_name}** — **Level {} (MAX)**\n🧪 Total XP: **{}/{MAX_XP}**",
            p.level, card.total_xp
        )
    } else {
        format!(
            "🏅 **{display_name}** — Level **{}**\n\
             🧪 XP: **{}/{}** toward next level (**{}%**, {} to go)\n\
             📈 Total XP: **{}/{MAX_XP}**",
            p.level,
            p.into_level,
            p.needed,
            p.percent(),
            p.remaining(),
            card.total_xp
        )
    }
}

pub fn leaderboard_text(rows: &[XpRow], name_of: impl Fn(&str) -> String) -> String {
    let lines: Vec<String> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            format!(
                "**#{}** — {}: {} XP (lvl {})",
                i + 1,
                name_of(&row.user_id),
                row.xp,
                level_from_xp(row.xp)
            )
        })
        .collect();
    format!("📜 **XP Leaderboard**\n{}", lines.join("\n"))
}

// ── Reply state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    Pending,
    Deferred,
    Done,
}

/// Tracks what has been sent for one interaction so it gets exactly one answer.
struct Reply<'a> {
    platform: &'a dyn ChatPlatform,
    interaction: &'a Interaction,
    state: ReplyState,
}

impl<'a> Reply<'a> {
    fn new(platform: &'a dyn ChatPlatform, interaction: &'a Interaction) -> Self {
        Self {
            platform,
            interaction,
            state: ReplyState::Pending,
        }
    }

    async fn defer(&mut self, ephemeral: bool) -> Result<(), BotError> {
        if self.state == ReplyState::Pending {
            self.platform.defer(self.interaction, ephemeral).await?;
            self.state = ReplyState::Deferred;
        }
        Ok(())
    }

    async fn send(&mut self, text: &str, ephemeral: bool) -> Result<(), BotError> {
        match self.state {
            ReplyState::Pending => self.platform.respond(self.interaction, text, ephemeral).await?,
            ReplyState::Deferred => {
                self.platform
                    .follow_up(self.interaction, text, ephemeral)
                    .await?
            }
            ReplyState::Done => {
                return Err(BotError::Dispatch(
                    "interaction already answered".to_string(),
                ))
            }
        }
        self.state = ReplyState::Done;
        Ok(())
    }
}

// ── Bot ──────────────────────────────────────────────────────────────

/// Process-wide bot context: engine, platform handle, command registry and
/// the display-name cache.
pub struct Bot {
    engine: ProgressionEngine,
    platform: Arc<dyn ChatPlatform>,
    registry: Vec<CommandSpec>,
    names: Mutex<HashMap<(String, String), String>>,
}

impl Bot {
    pub fn new(engine: ProgressionEngine, platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            engine,
            platform,
            registry: command_registry(),
            names: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &ProgressionEngine {
        &self.engine
    }

    pub fn registry(&self) -> &[CommandSpec] {
        &self.registry
    }

    /// Called every time the gateway reports a fresh session.
    pub async fn on_ready(&self) {
        if let Err(e) = self.platform.set_presence(DEFAULT_STATUS).await {
            tracing::warn!("Failed to set default presence: {e}");
        }
        match self.sync_commands().await {
            Ok(count) => tracing::info!(count, "Commands synced"),
            Err(e) => tracing::error!("Command sync failed: {e}"),
        }
    }

    /// Register the command set. A signature mismatch falls back to a hard resync.
    pub async fn sync_commands(&self) -> Result<usize, BotError> {
        match self.platform.sync_commands(&self.registry).await {
            Ok(count) => {
                metrics::COMMAND_SYNCS_TOTAL.with_label_values(&["ok"]).inc();
                Ok(count)
            }
            Err(BotError::SignatureMismatch(detail)) => {
                tracing::warn!("Signature mismatch detected ({detail}), hard resync");
                self.hard_resync().await
            }
            Err(e) => {
                metrics::COMMAND_SYNCS_TOTAL.with_label_values(&["failed"]).inc();
                Err(e)
            }
        }
    }

    /// Clear every registered command, then register the full set again.
    pub async fn hard_resync(&self) -> Result<usize, BotError> {
        let result = async {
            self.platform.sync_commands(&[]).await?;
            self.platform.sync_commands(&self.registry).await
        }
        .await;
        let label = if result.is_ok() { "hard_resync" } else { "failed" };
        metrics::COMMAND_SYNCS_TOTAL.with_label_values(&[label]).inc();
        if let Ok(count) = result {
            tracing::info!(count, "Hard resync done");
        }
        result
    }

    /// Award XP for a guild message and announce level-ups in its channel.
    pub async fn handle_message(&self, msg: GuildMessage) {
        let Some(guild_id) = msg.guild_id.as_deref() else {
            return;
        };
        if msg.author_is_bot {
            return;
        }
        metrics::MESSAGES_SEEN_TOTAL.inc();
        self.remember_name(guild_id, &msg.author.user_id, &msg.author.display_name);

        match self
            .engine
            .on_message(guild_id, &msg.author.user_id, Instant::now())
            .await
        {
            Ok(Some(level_up)) => self.announce(&msg.channel_id, &level_up).await,
            Ok(None) => {}
            Err(e) => {
                metrics::STORE_ERRORS_TOTAL.inc();
                tracing::error!(guild_id, user_id = %msg.author.user_id, "XP accrual failed: {e}");
            }
        }
    }

    /// Run one slash command. Never fails: errors become an ephemeral reply.
    pub async fn handle_command(&self, cmd: SlashCommand) {
        let mut reply = Reply::new(self.platform.as_ref(), &cmd.interaction);
        let result = self.run_command(&cmd, &mut reply).await;

        let outcome = match &result {
            Ok(()) => "ok",
            Err(e) => e.kind(),
        };
        metrics::COMMANDS_TOTAL
            .with_label_values(&[self.command_label(&cmd.name), outcome])
            .inc();

        let Err(err) = result else {
            return;
        };
        match &err {
            BotError::Validation(_) | BotError::PermissionDenied(_) => {
                tracing::info!(command = %cmd.name, user_id = %cmd.invoker.user_id, "Command rejected: {err}");
            }
            BotError::Storage(_) => {
                metrics::STORE_ERRORS_TOTAL.inc();
                tracing::error!(command = %cmd.name, "Command error: {err:?}");
            }
            _ => tracing::error!(command = %cmd.name, "Command error: {err:?}"),
        }

        if reply.state == ReplyState::Done {
            return;
        }
        if let Err(e) = reply.send(&err.user_message(), true).await {
            tracing::warn!(command = %cmd.name, "Failed to deliver error reply: {e}");
        }
    }

    async fn run_command(&self, cmd: &SlashCommand, reply: &mut Reply<'_>) -> Result<(), BotError> {
        let spec = self
            .registry
            .iter()
            .find(|s| s.name == cmd.name)
            .ok_or_else(|| BotError::Dispatch(format!("unknown command `{}`", cmd.name)))?;

        if let Some(required) = spec.required_permission {
            if !required.granted_by(&cmd.invoker.permissions) {
                return Err(BotError::PermissionDenied(required.label()));
            }
        }

        if let Some(guild_id) = cmd.guild_id() {
            self.remember_name(guild_id, &cmd.invoker.user_id, &cmd.invoker.display_name);
            for (user_id, user) in &cmd.resolved_users {
                self.remember_name(guild_id, user_id, &user.display_name);
            }
        }

        match cmd.name.as_str() {
            "rank" => self.rank(cmd, reply).await,
            "leaderboard" => self.leaderboard(cmd, reply).await,
            "ping" => self.ping(reply).await,
            "givexp" => self.give_xp(cmd, reply).await,
            "clearxp" => self.clear_xp(cmd, reply).await,
            "resync" => self.resync(reply).await,
            "debug" => self.debug(cmd, reply).await,
            other => Err(BotError::Dispatch(format!("no handler for `{other}`"))),
        }
    }

    async fn rank(&self, cmd: &SlashCommand, reply: &mut Reply<'_>) -> Result<(), BotError> {
        let guild_id = require_guild(cmd)?;
        let viewing_other = cmd.user_option("user")?;
        let target = viewing_other.unwrap_or(cmd.invoker.user_id.as_str());

        let card = self.engine.rank(guild_id, target).await?;
        let name = self.display_name(cmd, guild_id, target);
        reply.send(&rank_text(&name, &card), viewing_other.is_none()).await
    }

    async fn leaderboard(&self, cmd: &SlashCommand, reply: &mut Reply<'_>) -> Result<(), BotError> {
        let guild_id = require_guild(cmd)?;
        let limit = cmd.int_option("limit")?.unwrap_or(LEADERBOARD_DEFAULT);

        let rows = self.engine.leaderboard(guild_id, limit).await?;
        if rows.is_empty() {
            return reply.send("No ranking yet.", true).await;
        }
        let text = leaderboard_text(&rows, |user_id| self.display_name(cmd, guild_id, user_id));
        reply.send(&text, false).await
    }

    async fn ping(&self, reply: &mut Reply<'_>) -> Result<(), BotError> {
        let text = match self.platform.session() {
            Some(s) => format!("🏓 Pong! Latency: **{} ms**", s.latency_ms),
            None => "🏓 Pong! Latency: **unknown**".to_string(),
        };
        reply.send(&text, false).await
    }

    async fn give_xp(&self, cmd: &SlashCommand, reply: &mut Reply<'_>) -> Result<(), BotError> {
        reply.defer(true).await?;
        let guild_id = require_guild(cmd)?;
        let user_id = required_user(cmd)?;
        let amount = cmd.int_option("amount")?.unwrap_or(DEFAULT_GRANT_AMOUNT);

        let change = self.engine.grant_xp(guild_id, user_id, amount).await?;
        let name = self.display_name(cmd, guild_id, user_id);
        reply
            .send(
                &format!(
                    "✅ Gave **{amount} XP** to **{name}** (total: {} XP, lvl {}).",
                    change.new_xp, change.new_level
                ),
                true,
            )
            .await?;

        if change.leveled_up() {
            if let Some(channel_id) = cmd.interaction.channel_id.as_deref() {
                let level_up = LevelUp {
                    guild_id: guild_id.to_string(),
                    user_id: user_id.to_string(),
                    level: change.new_level,
                };
                self.announce(channel_id, &level_up).await;
            }
        }
        Ok(())
    }

    async fn clear_xp(&self, cmd: &SlashCommand, reply: &mut Reply<'_>) -> Result<(), BotError> {
        reply.defer(true).await?;
        let guild_id = require_guild(cmd)?;
        let user_id = required_user(cmd)?;

        self.engine.reset_xp(guild_id, user_id).await?;
        let name = self.display_name(cmd, guild_id, user_id);
        reply
            .send(&format!("♻️ XP of **{name}** reset to 0."), true)
            .await
    }

    async fn resync(&self, reply: &mut Reply<'_>) -> Result<(), BotError> {
        reply.defer(true).await?;
        let count = self.hard_resync().await?;
        reply
            .send(&format!("✅ Hard resync OK: **{count}** commands."), true)
            .await
    }

    async fn debug(&self, cmd: &SlashCommand, reply: &mut Reply<'_>) -> Result<(), BotError> {
        let session = self.platform.session().unwrap_or_default();
        let names: Vec<&str> = self.registry.iter().map(|c| c.name.as_str()).collect();
        let listed = if names.is_empty() {
            "(none)".to_string()
        } else {
            names.join(", ")
        };
        let manage_ok = RequiredPermission::ManageGuild.granted_by(&cmd.invoker.permissions);
        let cooldown = self.engine.cooldowns().window().as_secs();

        let text = format!(
            "**Bot:** {} (id: {})\n\
             **Application ID:** {}\n\
             **Current server (guild_id):** {}\n\
             **Registered commands:** {} → {}\n\
             **Cooldown:** {}s\n\
             **manage_guild permission:** {}",
            session.bot_user,
            session.bot_id,
            session.application_id.as_deref().unwrap_or("??"),
            cmd.guild_id().unwrap_or("none"),
            names.len(),
            listed,
            cooldown,
            if manage_ok { "OK" } else { "NOT OK" },
        );
        reply.send(&text, true).await
    }

    async fn announce(&self, channel_id: &str, level_up: &LevelUp) {
        let text = level_up_text(&level_up.user_id, level_up.level);
        if let Err(e) = self.platform.send_channel_message(channel_id, &text).await {
            tracing::warn!(channel_id, "Failed to announce level-up: {e}");
        }
    }

    /// Metric label for a command name. Unregistered names share one label.
    fn command_label<'a>(&'a self, name: &'a str) -> &'a str {
        if self.registry.iter().any(|c| c.name == name) {
            name
        } else {
            "unknown"
        }
    }

    fn remember_name(&self, guild_id: &str, user_id: &str, display_name: &str) {
        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        let key = (guild_id.to_string(), user_id.to_string());
        if names.len() >= MAX_CACHED_NAMES && !names.contains_key(&key) {
            if let Some(victim) = names.keys().next().cloned() {
                names.remove(&victim);
            }
        }
        names.insert(key, display_name.to_string());
    }

    /// Number of cached display names.
    pub fn cached_names(&self) -> usize {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn display_name(&self, cmd: &SlashCommand, guild_id: &str, user_id: &str) -> String {
        if let Some(name) = cmd.display_name_of(user_id) {
            return name.to_string();
        }
        let names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        names
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
            .unwrap_or_else(|| format!("User {user_id}"))
    }
}

fn require_guild(cmd: &SlashCommand) -> Result<&str, BotError> {
    cmd.guild_id()
        .ok_or_else(|| BotError::Validation("This command only works in a server.".to_string()))
}

fn required_user(cmd: &SlashCommand) -> Result<&str, BotError> {
    cmd.user_option("user")?
        .ok_or_else(|| BotError::Dispatch("missing required option `user`".to_string()))
}
