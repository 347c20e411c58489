use super::types::{Conversation, NewConversation};
use super::{Store, opt_ts_from_column, ts_from_column, ts_to_column};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

/// Preview length for the denormalized `last_message` column.
const PREVIEW_CHARS: usize = 140;

const CONVERSATION_COLUMNS: &str = "id, session_id, chat_id, contact_name, phone_number, \
     contact_id, is_group, unread_count, is_archived, is_pinned, is_muted, last_message, \
     last_message_time, last_message_from_me, lead_ref, customer_ref, created_at, updated_at";

fn map_conversation_row(row: &SqliteRow) -> Result<Conversation> {
    let last_message_time: Option<String> = row.try_get("last_message_time")?;

    Ok(Conversation {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        chat_id: row.try_get("chat_id")?,
        contact_name: row.try_get("contact_name")?,
        phone_number: row.try_get("phone_number")?,
        contact_id: row.try_get("contact_id")?,
        is_group: row.try_get::<i64, _>("is_group")? != 0,
        unread_count: row.try_get("unread_count")?,
        is_archived: row.try_get::<i64, _>("is_archived")? != 0,
        is_pinned: row.try_get::<i64, _>("is_pinned")? != 0,
        is_muted: row.try_get::<i64, _>("is_muted")? != 0,
        last_message: row.try_get("last_message")?,
        last_message_time: opt_ts_from_column(last_message_time)?,
        last_message_from_me: row.try_get::<i64, _>("last_message_from_me")? != 0,
        lead_ref: row.try_get("lead_ref")?,
        customer_ref: row.try_get("customer_ref")?,
        created_at: ts_from_column(&row.try_get::<String, _>("created_at")?)?,
        updated_at: ts_from_column(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn preview_of(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

impl Store {
    pub async fn find_conversation(
        &self,
        session_id: &str,
        chat_id: &str,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE session_id = $1 AND chat_id = $2"
        ))
        .bind(session_id)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .context("query conversation by chat id")?;

        row.map(|r| map_conversation_row(&r)).transpose()
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("query conversation by id")?;

        row.map(|r| map_conversation_row(&r)).transpose()
    }

    pub async fn create_conversation(&self, new: NewConversation<'_>) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = ts_to_column(Utc::now());

        sqlx::query(
            "INSERT INTO conversations
                 (id, session_id, chat_id, contact_name, phone_number, contact_id, is_group,
                  created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)",
        )
        .bind(&id)
        .bind(new.session_id)
        .bind(new.chat_id)
        .bind(new.contact_name)
        .bind(new.phone_number)
        .bind(new.contact_id)
        .bind(i64::from(new.is_group))
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("insert conversation")?;

        self.get_conversation(&id)
            .await?
            .context("conversation vanished after insert")
    }

    /// Recent active (non-archived) conversations, most recent message first.
    pub async fn recent_conversations(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE session_id = $1 AND is_archived = 0
             ORDER BY last_message_time DESC
             LIMIT $2"
        ))
        .bind(session_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("list recent conversations")?;

        rows.iter().map(map_conversation_row).collect()
    }

    /// Refresh the denormalized last-message preview. The unread counter is
    /// incremented only for inbound messages; it is monotonic except for the
    /// reset in `mark_conversation_read`.
    pub async fn touch_conversation_last_message(
        &self,
        id: &str,
        content: &str,
        timestamp: DateTime<Utc>,
        from_me: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET
                 last_message = $1,
                 last_message_time = $2,
                 last_message_from_me = $3,
                 unread_count = unread_count + $4,
                 updated_at = $5
             WHERE id = $6",
        )
        .bind(preview_of(content))
        .bind(ts_to_column(timestamp))
        .bind(i64::from(from_me))
        .bind(i64::from(!from_me))
        .bind(ts_to_column(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("update conversation last message")?;
        Ok(())
    }

    /// Overwrite the preview from a vendor chat snapshot without touching the
    /// unread counter (batch sync carries its own authoritative count).
    pub async fn set_conversation_last_message(
        &self,
        id: &str,
        content: &str,
        timestamp: Option<DateTime<Utc>>,
        from_me: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET
                 last_message = $1,
                 last_message_time = COALESCE($2, last_message_time),
                 last_message_from_me = $3,
                 updated_at = $4
             WHERE id = $5",
        )
        .bind(preview_of(content))
        .bind(timestamp.map(ts_to_column))
        .bind(i64::from(from_me))
        .bind(ts_to_column(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("set conversation last message")?;
        Ok(())
    }

    pub async fn set_conversation_unread(&self, id: &str, unread_count: i64) -> Result<()> {
        sqlx::query("UPDATE conversations SET unread_count = $1, updated_at = $2 WHERE id = $3")
            .bind(unread_count)
            .bind(ts_to_column(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("set conversation unread count")?;
        Ok(())
    }

    pub async fn mark_conversation_read(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE conversations SET unread_count = 0, updated_at = $1 WHERE id = $2")
            .bind(ts_to_column(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("mark conversation read")?;
        Ok(())
    }

    pub async fn set_conversation_archived(&self, id: &str, is_archived: bool) -> Result<()> {
        sqlx::query("UPDATE conversations SET is_archived = $1, updated_at = $2 WHERE id = $3")
            .bind(i64::from(is_archived))
            .bind(ts_to_column(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("update conversation archive flag")?;
        Ok(())
    }

    pub async fn set_conversation_name(&self, id: &str, contact_name: &str) -> Result<()> {
        sqlx::query("UPDATE conversations SET contact_name = $1, updated_at = $2 WHERE id = $3")
            .bind(contact_name)
            .bind(ts_to_column(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .context("update conversation name")?;
        Ok(())
    }

    /// Conversations own their messages: deleting cascades to messages and,
    /// transitively, reactions.
    pub async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete conversation")?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_session() -> (Store, String) {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.create_session("baileys-1", None).await.unwrap();
        (store, session.id)
    }

    #[tokio::test]
    async fn create_and_find_conversation() {
        let (store, session_id) = store_with_session().await;
        let conversation = store
            .create_conversation(NewConversation {
                session_id: &session_id,
                chat_id: "34600000000@s.whatsapp.net",
                contact_name: Some("Ana"),
                phone_number: "34600000000",
                contact_id: None,
                is_group: false,
            })
            .await
            .unwrap();

        assert_eq!(conversation.unread_count, 0);
        assert!(!conversation.is_archived);

        let found = store
            .find_conversation(&session_id, "34600000000@s.whatsapp.net")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, conversation.id);
    }

    #[tokio::test]
    async fn unread_counter_increments_on_inbound_only_and_resets_on_read() {
        let (store, session_id) = store_with_session().await;
        let conversation = store
            .create_conversation(NewConversation {
                session_id: &session_id,
                chat_id: "chat@c.us",
                contact_name: None,
                phone_number: "chat",
                contact_id: None,
                is_group: false,
            })
            .await
            .unwrap();

        let now = Utc::now();
        store
            .touch_conversation_last_message(&conversation.id, "hola", now, false)
            .await
            .unwrap();
        store
            .touch_conversation_last_message(&conversation.id, "que tal", now, false)
            .await
            .unwrap();
        // Own message must not bump the counter.
        store
            .touch_conversation_last_message(&conversation.id, "bien", now, true)
            .await
            .unwrap();

        let updated = store.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert_eq!(updated.unread_count, 2);
        assert_eq!(updated.last_message.as_deref(), Some("bien"));
        assert!(updated.last_message_from_me);

        store.mark_conversation_read(&conversation.id).await.unwrap();
        let read = store.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert_eq!(read.unread_count, 0);
    }

    #[tokio::test]
    async fn preview_is_truncated_to_140_chars() {
        let (store, session_id) = store_with_session().await;
        let conversation = store
            .create_conversation(NewConversation {
                session_id: &session_id,
                chat_id: "chat@c.us",
                contact_name: None,
                phone_number: "chat",
                contact_id: None,
                is_group: false,
            })
            .await
            .unwrap();

        let long = "x".repeat(500);
        store
            .touch_conversation_last_message(&conversation.id, &long, Utc::now(), false)
            .await
            .unwrap();

        let updated = store.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert_eq!(updated.last_message.unwrap().chars().count(), 140);
    }

    #[tokio::test]
    async fn archive_flag_roundtrip() {
        let (store, session_id) = store_with_session().await;
        let conversation = store
            .create_conversation(NewConversation {
                session_id: &session_id,
                chat_id: "chat@c.us",
                contact_name: None,
                phone_number: "chat",
                contact_id: None,
                is_group: false,
            })
            .await
            .unwrap();

        store
            .set_conversation_archived(&conversation.id, true)
            .await
            .unwrap();
        let archived = store.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert!(archived.is_archived);

        store
            .set_conversation_archived(&conversation.id, false)
            .await
            .unwrap();
        let restored = store.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert!(!restored.is_archived);
    }

    #[tokio::test]
    async fn duplicate_chat_id_per_session_is_rejected() {
        let (store, session_id) = store_with_session().await;
        let new = NewConversation {
            session_id: &session_id,
            chat_id: "chat@c.us",
            contact_name: None,
            phone_number: "chat",
            contact_id: None,
            is_group: false,
        };
        store.create_conversation(new.clone()).await.unwrap();
        assert!(store.create_conversation(new).await.is_err());
    }
}
