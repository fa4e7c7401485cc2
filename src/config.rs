// Application configuration, loaded from environment variables (and an optional
// .env file) plus CLI flags.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:xp.sqlite?mode=rwc";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STATUS_ROTATE_SECONDS: u64 = 30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("TOKEN is missing (set it in the environment or in .env)")]
    MissingToken,

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Application configuration.
#[derive(Clone)]
pub struct Config {
    /// Shared secret the gateway bridge presents as a bearer token.
    pub token: String,
    /// Minimum time between two XP-earning messages of one member. Zero disables it.
    pub cooldown: Duration,
    /// Interval between presence status changes.
    pub status_rotate: Duration,
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("cooldown", &self.cooldown)
            .field("status_rotate", &self.status_rotate)
            .field("database_url", &self.database_url)
            .field("port", &self.port)
            .finish()
    }
}

impl Config {
    /// Load configuration from `.env`, the process environment and CLI arguments.
    ///
    /// Environment variables:
    /// - `TOKEN` - required
    /// - `COOLDOWN_SECONDS` - default 0 (disabled)
    /// - `STATUS_ROTATE_SECONDS` - default 30
    /// - `DATABASE_URL` - default `sqlite:xp.sqlite?mode=rwc`
    /// - `PORT` - default 8080
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is normal in production.
        let _ = dotenvy::dotenv();
        let vars: HashMap<String, String> = std::env::vars().collect();
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&vars, &args)
    }

    /// Build the configuration from explicit variable and argument lists.
    pub fn from_sources(
        vars: &HashMap<String, String>,
        args: &[String],
    ) -> Result<Self, ConfigError> {
        let token = vars
            .get("TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let cooldown_secs: u64 = parse_var(vars, "COOLDOWN_SECONDS")?.unwrap_or(0);
        let rotate_secs: u64 = parse_var(vars, "STATUS_ROTATE_SECONDS")?
            .unwrap_or(DEFAULT_STATUS_ROTATE_SECONDS)
            .max(1);

        let database_url = vars
            .get("DATABASE_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = match Self::parse_cli_value(args, "--port") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                name: "--port",
                value: v,
            })?,
            None => parse_var(vars, "PORT")?.unwrap_or(DEFAULT_PORT),
        };

        Ok(Config {
            token,
            cooldown: Duration::from_secs(cooldown_secs),
            status_rotate: Duration::from_secs(rotate_secs),
            database_url,
            port,
        })
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match vars.get(name).map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| ConfigError::Invalid {
            name,
            value: v.to_string(),
        }),
    }
}
