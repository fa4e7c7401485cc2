// Database access layer (SQLite via sqlx): per-guild XP counters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct XpRow {
    pub user_id: String,
    pub xp: i64,
}

/// Storage primitives for XP counters. Every call touches one logical row
/// (or one ranked read) and is atomic on its own.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Create the counter table if it does not exist yet.
    async fn ensure_schema(&self) -> Result<(), sqlx::Error>;

    /// Current XP of a member, 0 when no row exists.
    async fn read_xp(&self, guild_id: &str, user_id: &str) -> Result<i64, sqlx::Error>;

    /// Upsert the absolute XP value of a member.
    async fn write_xp(&self, guild_id: &str, user_id: &str, xp: i64) -> Result<(), sqlx::Error>;

    /// At most `limit` rows of the guild, highest XP first. Rows with equal XP
    /// come back in storage order.
    async fn top_xp(&self, guild_id: &str, limit: i64) -> Result<Vec<XpRow>, sqlx::Error>;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // Every connection to `sqlite::memory:` opens its own database, so an
        // in-memory pool must stay on a single connection that never expires.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CounterStore for Database {
    async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS xp (
                guild_id TEXT NOT NULL,
                user_id  TEXT NOT NULL,
                xp       INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (guild_id, user_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_xp(&self, guild_id: &str, user_id: &str) -> Result<i64, sqlx::Error> {
        let xp: Option<i64> =
            sqlx::query_scalar("SELECT xp FROM xp WHERE guild_id = ? AND user_id = ?")
                .bind(guild_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(xp.unwrap_or(0))
    }

    async fn write_xp(&self, guild_id: &str, user_id: &str, xp: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO xp (guild_id, user_id, xp) VALUES (?, ?, ?) \
             ON CONFLICT(guild_id, user_id) DO UPDATE SET xp = excluded.xp",
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(xp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn top_xp(&self, guild_id: &str, limit: i64) -> Result<Vec<XpRow>, sqlx::Error> {
        let rows = sqlx::query_as::<_, XpRow>(
            "SELECT user_id, xp FROM xp WHERE guild_id = ? ORDER BY xp DESC LIMIT ?",
        )
        .bind(guild_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
