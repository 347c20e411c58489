use super::types::{Direction, Message, MessageStatus, NewMessage, Reaction};
use super::{Store, opt_ts_from_column, ts_from_column, ts_to_column};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, session_id, conversation_id, message_id, content, direction, \
     status, message_type, timestamp, from_number, to_number, from_me, has_media, media_path, \
     read_at, created_at";

fn map_message_row(row: &SqliteRow) -> Result<Message> {
    let direction_raw: String = row.try_get("direction")?;
    let status_raw: String = row.try_get("status")?;
    let read_at: Option<String> = row.try_get("read_at")?;

    Ok(Message {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        conversation_id: row.try_get("conversation_id")?,
        message_id: row.try_get("message_id")?,
        content: row.try_get("content")?,
        direction: Direction::parse(&direction_raw)?,
        status: MessageStatus::parse(&status_raw)?,
        message_type: row.try_get("message_type")?,
        timestamp: ts_from_column(&row.try_get::<String, _>("timestamp")?)?,
        from_number: row.try_get("from_number")?,
        to_number: row.try_get("to_number")?,
        from_me: row.try_get::<i64, _>("from_me")? != 0,
        has_media: row.try_get::<i64, _>("has_media")? != 0,
        media_path: row.try_get("media_path")?,
        read_at: opt_ts_from_column(read_at)?,
        created_at: ts_from_column(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn map_reaction_row(row: &SqliteRow) -> Result<Reaction> {
    Ok(Reaction {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        reacted_by: row.try_get("reacted_by")?,
        emoji: row.try_get("emoji")?,
        reacted_at: ts_from_column(&row.try_get::<String, _>("reacted_at")?)?,
    })
}

impl Store {
    /// Dedup probe: has a message with this external id already been stored
    /// for the session? At-least-once webhook delivery makes this the
    /// idempotency check for the whole ingest path.
    pub async fn message_exists(&self, session_id: &str, message_id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM messages WHERE session_id = $1 AND message_id = $2")
                .bind(session_id)
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await
                .context("probe message existence")?;
        Ok(row.is_some())
    }

    pub async fn insert_message(&self, new: NewMessage<'_>) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let now = ts_to_column(Utc::now());
        let read_at = (new.status == MessageStatus::Read).then(|| ts_to_column(new.timestamp));

        sqlx::query(
            "INSERT INTO messages
                 (id, session_id, conversation_id, message_id, content, direction, status,
                  message_type, timestamp, from_number, to_number, from_me, has_media,
                  read_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(&id)
        .bind(new.session_id)
        .bind(new.conversation_id)
        .bind(new.message_id)
        .bind(new.content)
        .bind(new.direction.as_str())
        .bind(new.status.as_str())
        .bind(new.message_type)
        .bind(ts_to_column(new.timestamp))
        .bind(new.from_number)
        .bind(new.to_number)
        .bind(i64::from(new.from_me))
        .bind(i64::from(new.has_media))
        .bind(read_at)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("insert message")?;

        self.get_message(&id)
            .await?
            .context("message vanished after insert")
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("query message by id")?;

        row.map(|r| map_message_row(&r)).transpose()
    }

    /// Look up by external message id. Status events carry no session scope,
    /// so the lookup spans sessions, mirroring the ingest path it replaces.
    pub async fn find_message(&self, message_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .context("query message by external id")?;

        row.map(|r| map_message_row(&r)).transpose()
    }

    pub async fn find_session_message(
        &self,
        session_id: &str,
        message_id: &str,
    ) -> Result<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = $1 AND message_id = $2"
        ))
        .bind(session_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .context("query session message")?;

        row.map(|r| map_message_row(&r)).transpose()
    }

    /// Update delivery status; entering Read stamps `read_at` once.
    pub async fn update_message_status(&self, id: &str, status: MessageStatus) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET
                 status = $1,
                 read_at = CASE WHEN $1 = 'read' AND read_at IS NULL THEN $2 ELSE read_at END
             WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(ts_to_column(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("update message status")?;
        Ok(())
    }

    pub async fn set_message_media_path(&self, id: &str, media_path: &str) -> Result<()> {
        sqlx::query("UPDATE messages SET media_path = $1 WHERE id = $2")
            .bind(media_path)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("update message media path")?;
        Ok(())
    }

    pub async fn conversation_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = $1
             ORDER BY timestamp DESC
             LIMIT $2"
        ))
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("list conversation messages")?;

        rows.iter().map(map_message_row).collect()
    }

    // ── Reactions ───────────────────────────────────────────────

    /// One live reaction per (message, reactor): a second emoji from the same
    /// number replaces the first.
    pub async fn upsert_reaction(
        &self,
        message_id: &str,
        reacted_by: &str,
        emoji: &str,
        reacted_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO reactions (id, message_id, reacted_by, emoji, reacted_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT(message_id, reacted_by)
             DO UPDATE SET emoji = excluded.emoji, reacted_at = excluded.reacted_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(message_id)
        .bind(reacted_by)
        .bind(emoji)
        .bind(ts_to_column(reacted_at))
        .execute(&self.pool)
        .await
        .context("upsert reaction")?;
        Ok(())
    }

    pub async fn remove_reaction(&self, message_id: &str, reacted_by: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM reactions WHERE message_id = $1 AND reacted_by = $2")
                .bind(message_id)
                .bind(reacted_by)
                .execute(&self.pool)
                .await
                .context("remove reaction")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn message_reactions(&self, message_id: &str) -> Result<Vec<Reaction>> {
        let rows = sqlx::query(
            "SELECT id, message_id, reacted_by, emoji, reacted_at FROM reactions
             WHERE message_id = $1
             ORDER BY reacted_at",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .context("list message reactions")?;

        rows.iter().map(map_reaction_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewConversation;

    async fn seeded_store() -> (Store, String, String) {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.create_session("baileys-1", None).await.unwrap();
        let conversation = store
            .create_conversation(NewConversation {
                session_id: &session.id,
                chat_id: "34600000000@s.whatsapp.net",
                contact_name: None,
                phone_number: "34600000000",
                contact_id: None,
                is_group: false,
            })
            .await
            .unwrap();
        (store, session.id, conversation.id)
    }

    fn new_message<'a>(
        session_id: &'a str,
        conversation_id: &'a str,
        message_id: &'a str,
        timestamp: DateTime<Utc>,
    ) -> NewMessage<'a> {
        NewMessage {
            session_id,
            conversation_id,
            message_id,
            content: "hi",
            direction: Direction::Incoming,
            status: MessageStatus::Delivered,
            message_type: "text",
            timestamp,
            from_number: Some("34600000000"),
            to_number: None,
            from_me: false,
            has_media: false,
        }
    }

    #[tokio::test]
    async fn duplicate_external_id_violates_unique_constraint() {
        let (store, session_id, conversation_id) = seeded_store().await;
        let now = Utc::now();

        store
            .insert_message(new_message(&session_id, &conversation_id, "M1", now))
            .await
            .unwrap();
        assert!(store.message_exists(&session_id, "M1").await.unwrap());
        assert!(
            store
                .insert_message(new_message(&session_id, &conversation_id, "M1", now))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn status_update_stamps_read_at_once() {
        let (store, session_id, conversation_id) = seeded_store().await;
        let message = store
            .insert_message(new_message(&session_id, &conversation_id, "M1", Utc::now()))
            .await
            .unwrap();
        assert!(message.read_at.is_none());

        store
            .update_message_status(&message.id, MessageStatus::Read)
            .await
            .unwrap();
        let read = store.get_message(&message.id).await.unwrap().unwrap();
        assert_eq!(read.status, MessageStatus::Read);
        let first_read_at = read.read_at.unwrap();

        // A redelivered read receipt must not move the stamp.
        store
            .update_message_status(&message.id, MessageStatus::Read)
            .await
            .unwrap();
        let again = store.get_message(&message.id).await.unwrap().unwrap();
        assert_eq!(again.read_at.unwrap(), first_read_at);
    }

    #[tokio::test]
    async fn reaction_upsert_replaces_previous_emoji() {
        let (store, session_id, conversation_id) = seeded_store().await;
        let message = store
            .insert_message(new_message(&session_id, &conversation_id, "M1", Utc::now()))
            .await
            .unwrap();

        let now = Utc::now();
        store
            .upsert_reaction(&message.id, "34611111111", "👍", now)
            .await
            .unwrap();
        store
            .upsert_reaction(&message.id, "34611111111", "❤️", now)
            .await
            .unwrap();
        store
            .upsert_reaction(&message.id, "34622222222", "😂", now)
            .await
            .unwrap();

        let reactions = store.message_reactions(&message.id).await.unwrap();
        assert_eq!(reactions.len(), 2);
        let mine = reactions
            .iter()
            .find(|r| r.reacted_by == "34611111111")
            .unwrap();
        assert_eq!(mine.emoji, "❤️");
    }

    #[tokio::test]
    async fn reaction_remove_deletes_only_that_reactor() {
        let (store, session_id, conversation_id) = seeded_store().await;
        let message = store
            .insert_message(new_message(&session_id, &conversation_id, "M1", Utc::now()))
            .await
            .unwrap();

        let now = Utc::now();
        store
            .upsert_reaction(&message.id, "34611111111", "👍", now)
            .await
            .unwrap();
        store
            .upsert_reaction(&message.id, "34622222222", "😂", now)
            .await
            .unwrap();

        assert!(store.remove_reaction(&message.id, "34611111111").await.unwrap());
        assert!(!store.remove_reaction(&message.id, "34611111111").await.unwrap());

        let reactions = store.message_reactions(&message.id).await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].reacted_by, "34622222222");
    }

    #[tokio::test]
    async fn deleting_conversation_cascades_to_messages_and_reactions() {
        let (store, session_id, conversation_id) = seeded_store().await;
        let message = store
            .insert_message(new_message(&session_id, &conversation_id, "M1", Utc::now()))
            .await
            .unwrap();
        store
            .upsert_reaction(&message.id, "34611111111", "👍", Utc::now())
            .await
            .unwrap();

        assert!(store.delete_conversation(&conversation_id).await.unwrap());
        assert!(store.get_message(&message.id).await.unwrap().is_none());
        assert!(store.message_reactions(&message.id).await.unwrap().is_empty());
        assert!(!store.message_exists(&session_id, "M1").await.unwrap());
    }

    #[tokio::test]
    async fn read_status_on_insert_stamps_read_at() {
        let (store, session_id, conversation_id) = seeded_store().await;
        let mut new = new_message(&session_id, &conversation_id, "M1", Utc::now());
        new.status = MessageStatus::Read;
        let message = store.insert_message(new).await.unwrap();
        assert!(message.read_at.is_some());
    }
}
