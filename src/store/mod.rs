//! SQLite persistence for sessions, conversations, messages, reactions and
//! contacts: the local state the webhook pipeline and sync passes write
//! into.
//!
//! Idempotent writes keyed by the external message id are the only
//! concurrency safeguard: overlapping webhook deliveries race on the
//! UNIQUE(session_id, message_id) constraint rather than on locks.

mod contacts;
mod conversations;
mod messages;
mod sessions;
mod types;

pub use types::{
    Contact, ContactPatch, Conversation, Direction, Message, MessageStatus, NewConversation,
    NewMessage, Reaction, Session, SessionStatus,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

const SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
const SCHEMA_VERSION_KEY: &str = "schema_version";
const SCHEMA_VERSION: u32 = 1;

async fn ensure_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_META_TABLE)
        .execute(pool)
        .await
        .context("create schema_meta table")?;

    let stored_version: Option<(String,)> =
        sqlx::query_as("SELECT value FROM schema_meta WHERE key = $1")
            .bind(SCHEMA_VERSION_KEY)
            .fetch_optional(pool)
            .await
            .context("load schema version")?;

    if let Some((value,)) = stored_version {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("invalid schema version value: {value}"))?;
        anyhow::ensure!(
            parsed == SCHEMA_VERSION,
            "incompatible schema version: stored={parsed}, expected={SCHEMA_VERSION}. \
compatibility is disabled; remove the database and restart."
        );
        return Ok(());
    }

    sqlx::query("INSERT INTO schema_meta (key, value) VALUES ($1, $2)")
        .bind(SCHEMA_VERSION_KEY)
        .bind(SCHEMA_VERSION.to_string())
        .execute(pool)
        .await
        .context("persist schema version")?;

    Ok(())
}

/// SQLite-backed relay store using an sqlx async pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create data directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("open database {}", path.display()))?;

        Self::with_pool(pool).await
    }

    /// In-memory store, used by tests. A single connection keeps every
    /// query on the same `:memory:` database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("open in-memory database")?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await?;

        ensure_schema_version(&pool).await?;
        create_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap connectivity probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sessions (
             id TEXT PRIMARY KEY,
             session_id TEXT NOT NULL UNIQUE,
             session_db_id INTEGER,
             phone_number TEXT,
             status TEXT NOT NULL DEFAULT 'disconnected',
             is_connected INTEGER NOT NULL DEFAULT 0,
             qr_code TEXT,
             last_activity TEXT,
             total_contacts INTEGER NOT NULL DEFAULT 0,
             total_chats INTEGER NOT NULL DEFAULT 0,
             total_messages INTEGER NOT NULL DEFAULT 0,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS contacts (
             id TEXT PRIMARY KEY,
             session_id TEXT NOT NULL REFERENCES sessions(id),
             contact_id TEXT,
             phone_number TEXT NOT NULL,
             contact_name TEXT,
             pushname TEXT,
             verified_name TEXT,
             profile_pic_url TEXT,
             is_user INTEGER NOT NULL DEFAULT 0,
             is_group INTEGER NOT NULL DEFAULT 0,
             is_wa_contact INTEGER NOT NULL DEFAULT 1,
             lead_ref TEXT,
             customer_ref TEXT,
             last_sync TEXT,
             created_at TEXT NOT NULL,
             UNIQUE(session_id, phone_number)
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS conversations (
             id TEXT PRIMARY KEY,
             session_id TEXT NOT NULL REFERENCES sessions(id),
             chat_id TEXT NOT NULL,
             contact_name TEXT,
             phone_number TEXT NOT NULL,
             contact_id TEXT,
             is_group INTEGER NOT NULL DEFAULT 0,
             unread_count INTEGER NOT NULL DEFAULT 0,
             is_archived INTEGER NOT NULL DEFAULT 0,
             is_pinned INTEGER NOT NULL DEFAULT 0,
             is_muted INTEGER NOT NULL DEFAULT 0,
             last_message TEXT,
             last_message_time TEXT,
             last_message_from_me INTEGER NOT NULL DEFAULT 0,
             lead_ref TEXT,
             customer_ref TEXT,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL,
             UNIQUE(session_id, chat_id)
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
             id TEXT PRIMARY KEY,
             session_id TEXT NOT NULL REFERENCES sessions(id),
             conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
             message_id TEXT NOT NULL,
             content TEXT NOT NULL DEFAULT '',
             direction TEXT NOT NULL,
             status TEXT NOT NULL,
             message_type TEXT NOT NULL DEFAULT 'text',
             timestamp TEXT NOT NULL,
             from_number TEXT,
             to_number TEXT,
             from_me INTEGER NOT NULL DEFAULT 0,
             has_media INTEGER NOT NULL DEFAULT 0,
             media_path TEXT,
             read_at TEXT,
             created_at TEXT NOT NULL,
             UNIQUE(session_id, message_id)
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS reactions (
             id TEXT PRIMARY KEY,
             message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
             reacted_by TEXT NOT NULL,
             emoji TEXT NOT NULL,
             reacted_at TEXT NOT NULL,
             UNIQUE(message_id, reacted_by)
         )",
    )
    .execute(pool)
    .await?;

    // CRM registry the surrounding layer populates; the resolver links
    // contacts to it by exact phone match only.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS crm_entities (
             ref TEXT PRIMARY KEY,
             kind TEXT NOT NULL,
             phone_number TEXT NOT NULL,
             display_name TEXT
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, timestamp)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_session
             ON conversations(session_id, last_message_time)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_crm_entities_phone
             ON crm_entities(phone_number)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── Timestamp column helpers ─────────────────────────────────────

pub(crate) fn ts_to_column(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn ts_from_column(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid stored timestamp: {raw}"))?
        .with_timezone(&Utc))
}

pub(crate) fn opt_ts_from_column(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(ts_from_column).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_version_is_persisted_on_first_open() {
        let store = Store::open_in_memory().await.unwrap();
        let (value,): (String,) =
            sqlx::query_as("SELECT value FROM schema_meta WHERE key = 'schema_version'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(value, SCHEMA_VERSION.to_string());
    }

    #[tokio::test]
    async fn ping_succeeds_on_open_store() {
        let store = Store::open_in_memory().await.unwrap();
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("relay.db");
        let store = Store::open(&path).await.unwrap();
        store.ping().await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = ts_from_column(&ts_to_column(now)).unwrap();
        assert_eq!(parsed, now);
    }
}
