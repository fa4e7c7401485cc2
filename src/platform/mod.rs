// Chat platform boundary: inbound event types and the outbound operations the bot needs.

pub mod bridge;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BotError;

// ── Inbound events ───────────────────────────────────────────────────

/// Handle used to answer one slash command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
}

/// Resolved guild permissions of a member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub manage_guild: bool,
    #[serde(default)]
    pub administrator: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMessage {
    /// None for direct messages.
    #[serde(default)]
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub author: Member,
    #[serde(default)]
    pub author_is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Integer(i64),
    Boolean(bool),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUser {
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommand {
    pub interaction: Interaction,
    pub name: String,
    #[serde(default)]
    pub options: HashMap<String, OptionValue>,
    pub invoker: Member,
    /// Users referenced by user-typed options, keyed by user id.
    #[serde(default)]
    pub resolved_users: HashMap<String, ResolvedUser>,
}

impl SlashCommand {
    pub fn guild_id(&self) -> Option<&str> {
        self.interaction.guild_id.as_deref()
    }

    /// A user-typed option, as a user id.
    pub fn user_option(&self, name: &str) -> Result<Option<&str>, BotError> {
        match self.options.get(name) {
            None => Ok(None),
            Some(OptionValue::String(id)) => Ok(Some(id.as_str())),
            Some(other) => Err(BotError::Dispatch(format!(
                "option `{name}` should be a user, got {other:?}"
            ))),
        }
    }

    pub fn int_option(&self, name: &str) -> Result<Option<i64>, BotError> {
        match self.options.get(name) {
            None => Ok(None),
            Some(OptionValue::Integer(v)) => Ok(Some(*v)),
            Some(other) => Err(BotError::Dispatch(format!(
                "option `{name}` should be an integer, got {other:?}"
            ))),
        }
    }

    /// Display name for a user id seen in this invocation, if any.
    pub fn display_name_of(&self, user_id: &str) -> Option<&str> {
        if self.invoker.user_id == user_id {
            return Some(self.invoker.display_name.as_str());
        }
        self.resolved_users
            .get(user_id)
            .map(|u| u.display_name.as_str())
    }
}

/// Gateway session details, refreshed by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub bot_user: String,
    pub bot_id: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub guild_count: u64,
    #[serde(default)]
    pub member_count: u64,
}

// ── Command registration ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    User,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    pub kind: OptionKind,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredPermission {
    ManageGuild,
    Administrator,
}

impl RequiredPermission {
    pub fn label(self) -> &'static str {
        match self {
            RequiredPermission::ManageGuild => "Manage Server",
            RequiredPermission::Administrator => "Administrator",
        }
    }

    /// Administrators implicitly hold every other permission.
    pub fn granted_by(self, perms: &Permissions) -> bool {
        match self {
            RequiredPermission::ManageGuild => perms.manage_guild || perms.administrator,
            RequiredPermission::Administrator => perms.administrator,
        }
    }
}

/// One slash command as registered with the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
    #[serde(default)]
    pub required_permission: Option<RequiredPermission>,
}

// ── Outbound operations ──────────────────────────────────────────────

/// Everything the bot asks of the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_channel_message(&self, channel_id: &str, text: &str) -> Result<(), BotError>;

    /// Immediate answer to an interaction.
    async fn respond(
        &self,
        interaction: &Interaction,
        text: &str,
        ephemeral: bool,
    ) -> Result<(), BotError>;

    /// Acknowledge an interaction now and answer later with `follow_up`.
    async fn defer(&self, interaction: &Interaction, ephemeral: bool) -> Result<(), BotError>;

    async fn follow_up(
        &self,
        interaction: &Interaction,
        text: &str,
        ephemeral: bool,
    ) -> Result<(), BotError>;

    async fn set_presence(&self, status: &str) -> Result<(), BotError>;

    /// Replace the registered command set; returns how many commands the
    /// platform now has registered.
    async fn sync_commands(&self, commands: &[CommandSpec]) -> Result<usize, BotError>;

    /// Current session, None until the gateway reported ready.
    fn session(&self) -> Option<SessionInfo>;

    async fn wait_until_ready(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_json() -> &'static str {
        r#"{
            "interaction": {"id": "i1", "token": "tok", "channel_id": "c1", "guild_id": "g1"},
            "name": "givexp",
            "options": {"user": "42", "amount": 250},
            "invoker": {"user_id": "7", "display_name": "Mod", "permissions": {"manage_guild": true}},
            "resolved_users": {"42": {"display_name": "Alice"}}
        }"#
    }

    #[test]
    fn test_parse_slash_command() {
        let cmd: SlashCommand = serde_json::from_str(command_json()).unwrap();
        assert_eq!(cmd.guild_id(), Some("g1"));
        assert_eq!(cmd.user_option("user").unwrap(), Some("42"));
        assert_eq!(cmd.int_option("amount").unwrap(), Some(250));
        assert_eq!(cmd.int_option("limit").unwrap(), None);
        assert!(cmd.invoker.permissions.manage_guild);
        assert!(!cmd.invoker.permissions.administrator);
        assert_eq!(cmd.display_name_of("42"), Some("Alice"));
        assert_eq!(cmd.display_name_of("7"), Some("Mod"));
        assert_eq!(cmd.display_name_of("99"), None);
    }

    #[test]
    fn test_option_type_mismatch() {
        let cmd: SlashCommand = serde_json::from_str(command_json()).unwrap();
        assert!(matches!(
            cmd.int_option("user"),
            Err(BotError::Dispatch(_))
        ));
        assert!(matches!(
            cmd.user_option("amount"),
            Err(BotError::Dispatch(_))
        ));
    }

    #[test]
    fn test_message_defaults() {
        let msg: GuildMessage = serde_json::from_str(
            r#"{"channel_id": "c", "author": {"user_id": "1", "display_name": "Bob"}}"#,
        )
        .unwrap();
        assert_eq!(msg.guild_id, None);
        assert!(!msg.author_is_bot);
        assert_eq!(msg.author.permissions, Permissions::default());
    }

    #[test]
    fn test_permission_checks() {
        let none = Permissions::default();
        let manage = Permissions {
            manage_guild: true,
            administrator: false,
        };
        let admin = Permissions {
            manage_guild: false,
            administrator: true,
        };

        assert!(!RequiredPermission::ManageGuild.granted_by(&none));
        assert!(RequiredPermission::ManageGuild.granted_by(&manage));
        assert!(RequiredPermission::ManageGuild.granted_by(&admin));
        assert!(!RequiredPermission::Administrator.granted_by(&manage));
        assert!(RequiredPermission::Administrator.granted_by(&admin));
    }
}
