use super::types::{Session, SessionStatus};
use super::{Store, opt_ts_from_column, ts_from_column, ts_to_column};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, session_id, session_db_id, phone_number, status, is_connected, \
     qr_code, last_activity, total_contacts, total_chats, total_messages, created_at, updated_at";

fn map_session_row(row: &SqliteRow) -> Result<Session> {
    let status_raw: String = row.try_get("status")?;
    let last_activity: Option<String> = row.try_get("last_activity")?;

    Ok(Session {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        session_db_id: row.try_get("session_db_id")?,
        phone_number: row.try_get("phone_number")?,
        status: SessionStatus::parse(&status_raw)?,
        is_connected: row.try_get::<i64, _>("is_connected")? != 0,
        qr_code: row.try_get("qr_code")?,
        last_activity: opt_ts_from_column(last_activity)?,
        total_contacts: row.try_get("total_contacts")?,
        total_chats: row.try_get("total_chats")?,
        total_messages: row.try_get("total_messages")?,
        created_at: ts_from_column(&row.try_get::<String, _>("created_at")?)?,
        updated_at: ts_from_column(&row.try_get::<String, _>("updated_at")?)?,
    })
}

impl Store {
    /// Register a session for a vendor `sessionId`. Called when a user
    /// registers a WhatsApp number; sessions are never hard-deleted.
    pub async fn create_session(
        &self,
        session_id: &str,
        phone_number: Option<&str>,
    ) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        let now = ts_to_column(Utc::now());

        sqlx::query(
            "INSERT INTO sessions (id, session_id, phone_number, status, is_connected, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 0, $5, $5)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(phone_number)
        .bind(SessionStatus::Disconnected.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("insert session")?;

        self.get_session(&id)
            .await?
            .context("session vanished after insert")
    }

    /// Look up by local row id.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("query session by id")?;

        row.map(|r| map_session_row(&r)).transpose()
    }

    /// Look up by the vendor's `sessionId`.
    pub async fn find_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("query session by session_id")?;

        row.map(|r| map_session_row(&r)).transpose()
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .context("list sessions")?;

        rows.iter().map(map_session_row).collect()
    }

    pub async fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
        is_connected: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET status = $1, is_connected = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(status.as_str())
        .bind(i64::from(is_connected))
        .bind(ts_to_column(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("update session status")?;
        Ok(())
    }

    pub async fn set_session_phone(&self, id: &str, phone_number: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET phone_number = $1, updated_at = $2 WHERE id = $3")
            .bind(phone_number)
            .bind(ts_to_column(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("update session phone number")?;
        Ok(())
    }

    pub async fn set_session_db_id(&self, id: &str, session_db_id: i64) -> Result<()> {
        sqlx::query("UPDATE sessions SET session_db_id = $1, updated_at = $2 WHERE id = $3")
            .bind(session_db_id)
            .bind(ts_to_column(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("update session db id")?;
        Ok(())
    }

    pub async fn set_session_last_activity(
        &self,
        id: &str,
        last_activity: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_activity = $1, updated_at = $2 WHERE id = $3")
            .bind(ts_to_column(last_activity))
            .bind(ts_to_column(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("update session last activity")?;
        Ok(())
    }

    /// Retain the latest QR payload so the UI can re-render it on reload.
    pub async fn set_session_qr(&self, id: &str, qr_code: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET qr_code = $1, updated_at = $2 WHERE id = $3")
            .bind(qr_code)
            .bind(ts_to_column(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("update session qr code")?;
        Ok(())
    }

    /// Refresh the denormalized contact/chat/message counters.
    pub async fn update_session_stats(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET
                 total_contacts = (SELECT COUNT(*) FROM contacts WHERE session_id = $1),
                 total_chats = (SELECT COUNT(*) FROM conversations WHERE session_id = $1),
                 total_messages = (SELECT COUNT(*) FROM messages WHERE session_id = $1),
                 updated_at = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(ts_to_column(Utc::now()))
        .execute(&self.pool)
        .await
        .context("update session stats")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_find_session() {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.create_session("baileys-1", None).await.unwrap();
        assert_eq!(session.status, SessionStatus::Disconnected);
        assert!(!session.is_connected);
        assert!(session.phone_number.is_none());

        let found = store.find_session("baileys-1").await.unwrap().unwrap();
        assert_eq!(found.id, session.id);

        assert!(store.find_session("missing").await.unwrap().is_none());

        let all = store.list_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].session_id, "baileys-1");
    }

    #[tokio::test]
    async fn duplicate_session_id_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_session("baileys-1", None).await.unwrap();
        assert!(store.create_session("baileys-1", None).await.is_err());
    }

    #[tokio::test]
    async fn status_update_persists() {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.create_session("baileys-1", None).await.unwrap();

        store
            .update_session_status(&session.id, SessionStatus::Connected, true)
            .await
            .unwrap();

        let updated = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(updated.status, SessionStatus::Connected);
        assert!(updated.is_connected);
    }

    #[tokio::test]
    async fn phone_and_db_id_updates_persist() {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.create_session("baileys-1", None).await.unwrap();

        store
            .set_session_phone(&session.id, "34600000000")
            .await
            .unwrap();
        store.set_session_db_id(&session.id, 42).await.unwrap();

        let updated = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(updated.phone_number.as_deref(), Some("34600000000"));
        assert_eq!(updated.session_db_id, Some(42));
    }

    #[tokio::test]
    async fn qr_code_is_retained() {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.create_session("baileys-1", None).await.unwrap();
        store
            .set_session_qr(&session.id, "qr-payload-base64")
            .await
            .unwrap();
        let updated = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(updated.qr_code.as_deref(), Some("qr-payload-base64"));
    }
}
