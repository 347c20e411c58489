//! Batch synchronization of contacts, chats and recent messages from the
//! vendor gateway into the local store.
//!
//! Individual record failures are counted, never fatal: every pass returns
//! `{processed, created, updated, errors}` and the batch keeps going.

use crate::config::SyncConfig;
use crate::reconcile;
use crate::resolver;
use crate::store::{ContactPatch, Direction, MessageStatus, NewMessage, Session, Store};
use crate::vendor::VendorClient;
use crate::webhook::{parse_timestamp, strip_jid};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SyncCounts {
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    pub errors: u32,
}

#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub session: String,
    pub contacts: SyncCounts,
    pub chats: SyncCounts,
    pub messages: SyncCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncReport {
    fn refused(session: &Session, message: String) -> Self {
        Self {
            success: false,
            session: session.session_id.clone(),
            contacts: SyncCounts::default(),
            chats: SyncCounts::default(),
            messages: SyncCounts::default(),
            message: Some(message),
        }
    }
}

fn envelope_ok(response: &Value) -> bool {
    response
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn data_array(response: &Value, key: &str) -> Vec<Value> {
    response
        .get("data")
        .and_then(|data| data.get(key))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn str_of(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Full sync of one session: status reconcile first, then contacts, chats
/// and recent messages, then the session counters.
///
/// The remote status is always verified against the live vendor list before
/// anything else (the local flag may be stale), and the sync refuses to run
/// unless the session is Connected remotely.
pub async fn sync_session(
    store: &Store,
    vendor: &VendorClient,
    session: &Session,
    config: &SyncConfig,
) -> Result<SyncReport> {
    let status = reconcile::poll_session_status(store, vendor, session).await?;
    if !status.is_connected {
        return Ok(SyncReport::refused(
            session,
            format!(
                "session is not connected on the gateway (status: {}); reconnect by scanning the QR code",
                status.status.as_str()
            ),
        ));
    }

    // poll_session_status may have refreshed phone/db id.
    let session = store
        .get_session(&session.id)
        .await?
        .unwrap_or_else(|| session.clone());

    let contacts = sync_contacts(store, vendor, &session, config.contacts_limit).await;
    let chats = sync_chats(store, vendor, &session, config.chats_limit).await;
    let messages = sync_messages(
        store,
        vendor,
        &session,
        config.conversations_limit,
        config.messages_limit,
    )
    .await;

    store.update_session_stats(&session.id).await?;

    Ok(SyncReport {
        success: true,
        session: session.session_id.clone(),
        contacts,
        chats,
        messages,
        message: None,
    })
}

/// One page of contacts from the vendor, upserted into the store.
pub async fn sync_contacts(
    store: &Store,
    vendor: &VendorClient,
    session: &Session,
    limit: u32,
) -> SyncCounts {
    let mut counts = SyncCounts::default();

    let response = match vendor.session_contacts(&session.session_id, 1, limit).await {
        Ok(response) if envelope_ok(&response) => response,
        Ok(_) => {
            counts.errors += 1;
            return counts;
        }
        Err(error) => {
            tracing::warn!(
                session = session.session_id.as_str(),
                error = %error,
                "contact sync request failed"
            );
            counts.errors += 1;
            return counts;
        }
    };

    for contact_data in data_array(&response, "contacts") {
        let Some(contact_id) = str_of(&contact_data, "id") else {
            continue;
        };
        let phone_number = strip_jid(&str_of(&contact_data, "phone").unwrap_or(contact_id.clone()));

        let patch = ContactPatch {
            contact_id: Some(contact_id.clone()),
            contact_name: str_of(&contact_data, "name"),
            pushname: str_of(&contact_data, "notify"),
            verified_name: str_of(&contact_data, "verifiedName"),
            profile_pic_url: str_of(&contact_data, "imgUrl"),
            is_user: contact_data.get("isUser").and_then(Value::as_bool),
            is_group: contact_data.get("isGroup").and_then(Value::as_bool),
            is_wa_contact: contact_data.get("isWAContact").and_then(Value::as_bool),
        };

        counts.processed += 1;
        match resolver::resolve_contact(store, &session.id, &phone_number, &patch).await {
            Ok((_, true)) => counts.created += 1,
            Ok((_, false)) => counts.updated += 1,
            Err(error) => {
                counts.errors += 1;
                tracing::warn!(
                    contact = contact_id.as_str(),
                    error = %error,
                    "contact sync record failed"
                );
            }
        }
    }

    counts
}

/// One page of chats, created or refreshed with the vendor's snapshot.
pub async fn sync_chats(
    store: &Store,
    vendor: &VendorClient,
    session: &Session,
    limit: u32,
) -> SyncCounts {
    let mut counts = SyncCounts::default();

    let response = match vendor.session_chats(&session.session_id, 1, limit).await {
        Ok(response) if envelope_ok(&response) => response,
        Ok(_) => {
            counts.errors += 1;
            return counts;
        }
        Err(error) => {
            tracing::warn!(
                session = session.session_id.as_str(),
                error = %error,
                "chat sync request failed"
            );
            counts.errors += 1;
            return counts;
        }
    };

    for chat_data in data_array(&response, "chats") {
        let Some(chat_id) = str_of(&chat_data, "chatId") else {
            continue;
        };

        counts.processed += 1;
        match apply_chat_snapshot(store, session, &chat_id, &chat_data).await {
            Ok(created) => {
                if created {
                    counts.created += 1;
                } else {
                    counts.updated += 1;
                }
            }
            Err(error) => {
                counts.errors += 1;
                tracing::warn!(
                    chat = chat_id.as_str(),
                    error = %error,
                    "chat sync record failed"
                );
            }
        }
    }

    counts
}

async fn apply_chat_snapshot(
    store: &Store,
    session: &Session,
    chat_id: &str,
    chat_data: &Value,
) -> Result<bool> {
    let existing = store.find_conversation(&session.id, chat_id).await?;
    let created = existing.is_none();

    let conversation = match existing {
        Some(conversation) => conversation,
        None => {
            resolver::resolve_conversation(
                store,
                &session.id,
                chat_id,
                str_of(chat_data, "name").as_deref(),
                chat_data
                    .get("isGroup")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            )
            .await?
        }
    };

    if let Some(name) = str_of(chat_data, "name") {
        store.set_conversation_name(&conversation.id, &name).await?;
    }
    if let Some(unread) = chat_data.get("unreadCount").and_then(Value::as_i64) {
        store.set_conversation_unread(&conversation.id, unread).await?;
    }

    let last_message = chat_data.get("lastMessage").cloned().unwrap_or(Value::Null);
    if let Some(content) = last_message.get("content").and_then(Value::as_str)
        && !content.is_empty()
    {
        let timestamp = last_message
            .get("timestamp")
            .filter(|v| !v.is_null())
            .map(|v| parse_timestamp(Some(v)));
        let from_me = last_message
            .get("fromMe")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        store
            .set_conversation_last_message(&conversation.id, content, timestamp, from_me)
            .await?;
    }

    Ok(created)
}

/// Recent messages for the most recently active conversations, deduplicated
/// by external id and status-mapped exactly like the webhook path.
pub async fn sync_messages(
    store: &Store,
    vendor: &VendorClient,
    session: &Session,
    conversations_limit: u32,
    messages_limit: u32,
) -> SyncCounts {
    let mut counts = SyncCounts::default();

    let conversations = match store
        .recent_conversations(&session.id, conversations_limit)
        .await
    {
        Ok(conversations) => conversations,
        Err(error) => {
            tracing::warn!(error = %error, "listing conversations for message sync failed");
            counts.errors += 1;
            return counts;
        }
    };

    for conversation in conversations {
        let response = match vendor
            .chat_messages(&session.session_id, &conversation.chat_id, 1, messages_limit)
            .await
        {
            Ok(response) if envelope_ok(&response) => response,
            Ok(_) => continue,
            Err(error) => {
                tracing::warn!(
                    chat = conversation.chat_id.as_str(),
                    error = %error,
                    "chat message sync request failed"
                );
                continue;
            }
        };

        for msg_data in data_array(&response, "messages") {
            let Some(message_id) = str_of(&msg_data, "whatsappMessageId")
                .or_else(|| str_of(&msg_data, "id"))
            else {
                continue;
            };

            counts.processed += 1;
            let status =
                MessageStatus::from_vendor(&str_of(&msg_data, "status").unwrap_or_default());

            let result = match store.find_session_message(&session.id, &message_id).await {
                Ok(Some(existing)) => store
                    .update_message_status(&existing.id, status)
                    .await
                    .map(|()| false),
                Ok(None) => {
                    insert_synced_message(
                        store,
                        session,
                        &conversation.id,
                        &message_id,
                        status,
                        &msg_data,
                    )
                    .await
                    .map(|()| true)
                }
                Err(error) => Err(error),
            };

            match result {
                Ok(true) => counts.created += 1,
                Ok(false) => counts.updated += 1,
                Err(error) => {
                    counts.errors += 1;
                    tracing::warn!(
                        message = message_id.as_str(),
                        error = %error,
                        "message sync record failed"
                    );
                }
            }
        }
    }

    counts
}

async fn insert_synced_message(
    store: &Store,
    session: &Session,
    conversation_id: &str,
    message_id: &str,
    status: MessageStatus,
    msg_data: &Value,
) -> Result<()> {
    let from_me = msg_data
        .get("fromMe")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let content = str_of(msg_data, "content")
        .or_else(|| str_of(msg_data, "text_content"))
        .unwrap_or_default();
    let from_number = str_of(msg_data, "from")
        .or_else(|| str_of(msg_data, "sender"))
        .map(|raw| strip_jid(&raw));
    let to_number = str_of(msg_data, "to")
        .or_else(|| str_of(msg_data, "recipients"))
        .map(|raw| strip_jid(&raw));

    store
        .insert_message(NewMessage {
            session_id: &session.id,
            conversation_id,
            message_id,
            content: &content,
            direction: if from_me {
                Direction::Outgoing
            } else {
                Direction::Incoming
            },
            status,
            message_type: &str_of(msg_data, "type").unwrap_or_else(|| "text".to_owned()),
            timestamp: parse_timestamp(msg_data.get("timestamp")),
            from_number: from_number.as_deref(),
            to_number: to_number.as_deref(),
            from_me,
            has_media: msg_data
                .get("has_attachment")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn seeded() -> (Store, Session) {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.create_session("baileys-1", None).await.unwrap();
        (store, session)
    }

    fn client(server: &MockServer) -> VendorClient {
        VendorClient::new(server.uri(), "k").with_retry_attempts(1)
    }

    #[tokio::test]
    async fn contact_sync_counts_created_and_updated() {
        let (store, session) = seeded().await;
        store
            .create_contact(&session.id, "34600000001", &ContactPatch::default())
            .await
            .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/contacts/baileys-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"contacts": [
                    {"id": "34600000001@c.us", "phone": "34600000001", "name": "Ana"},
                    {"id": "34600000002@c.us", "phone": "34600000002", "name": "Berta"},
                    // No id: skipped, not an error.
                    {"phone": "34600000003"},
                ]}
            })))
            .mount(&server)
            .await;

        let counts = sync_contacts(&store, &client(&server), &session, 200).await;
        assert_eq!(
            counts,
            SyncCounts {
                processed: 2,
                created: 1,
                updated: 1,
                errors: 0
            }
        );

        let ana = store
            .find_contact(&session.id, "34600000001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ana.contact_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn contact_sync_failure_is_one_error_not_a_panic() {
        let (store, session) = seeded().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/contacts/baileys-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "unknown session"
            })))
            .mount(&server)
            .await;

        let counts = sync_contacts(&store, &client(&server), &session, 200).await;
        assert_eq!(counts.errors, 1);
        assert_eq!(counts.processed, 0);
    }

    #[tokio::test]
    async fn chat_sync_creates_and_refreshes_snapshots() {
        let (store, session) = seeded().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/messages/baileys-1/chats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"chats": [{
                    "chatId": "34600000000@s.whatsapp.net",
                    "name": "Ana",
                    "unreadCount": 3,
                    "isGroup": false,
                    "lastMessage": {"content": "nos vemos", "timestamp": 1_700_000_000,
                                     "fromMe": false},
                }]}
            })))
            .mount(&server)
            .await;

        let counts = sync_chats(&store, &client(&server), &session, 50).await;
        assert_eq!(counts.created, 1);

        let conversation = store
            .find_conversation(&session.id, "34600000000@s.whatsapp.net")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.contact_name.as_deref(), Some("Ana"));
        assert_eq!(conversation.unread_count, 3);
        assert_eq!(conversation.last_message.as_deref(), Some("nos vemos"));
        assert_eq!(
            conversation.last_message_time.unwrap().timestamp(),
            1_700_000_000
        );

        // Second pass updates in place.
        let counts = sync_chats(&store, &client(&server), &session, 50).await;
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.created, 0);
    }

    #[tokio::test]
    async fn message_sync_dedups_and_maps_status() {
        let (store, session) = seeded().await;
        let conversation = resolver::resolve_conversation(
            &store,
            &session.id,
            "34600000000@s.whatsapp.net",
            None,
            false,
        )
        .await
        .unwrap();
        // Give the conversation a recent activity stamp so it is visited.
        store
            .set_conversation_last_message(
                &conversation.id,
                "seed",
                Some(chrono::Utc::now()),
                false,
            )
            .await
            .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/messages/baileys-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"messages": [
                    {"whatsappMessageId": "M1", "content": "hola", "status": "delivered",
                     "from": "34600000000@s.whatsapp.net", "fromMe": false,
                     "timestamp": "2023-11-14T22:13:20Z"},
                    {"id": "M2", "content": "adios", "status": "read", "fromMe": true},
                    // No id at all: skipped.
                    {"content": "fantasma"},
                ]}
            })))
            .mount(&server)
            .await;

        let counts = sync_messages(&store, &client(&server), &session, 10, 50).await;
        assert_eq!(
            counts,
            SyncCounts {
                processed: 2,
                created: 2,
                updated: 0,
                errors: 0
            }
        );

        let m1 = store
            .find_session_message(&session.id, "M1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m1.status, MessageStatus::Delivered);
        assert_eq!(m1.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(m1.direction, Direction::Incoming);

        let m2 = store
            .find_session_message(&session.id, "M2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m2.status, MessageStatus::Read);
        assert_eq!(m2.direction, Direction::Outgoing);

        // Re-running updates instead of duplicating.
        let counts = sync_messages(&store, &client(&server), &session, 10, 50).await;
        assert_eq!(counts.created, 0);
        assert_eq!(counts.updated, 2);
        assert!(store.message_exists(&session.id, "M1").await.unwrap());
    }

    #[tokio::test]
    async fn full_sync_refuses_disconnected_session() {
        let (store, session) = seeded().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"sessions": [{"sessionId": "baileys-1", "status": "qr_code"}]}
            })))
            .mount(&server)
            .await;

        let report = sync_session(&store, &client(&server), &session, &SyncConfig::default())
            .await
            .unwrap();
        assert!(!report.success);
        assert!(report.message.unwrap().contains("not connected"));

        // The reconcile still landed locally.
        let refreshed = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(
            refreshed.status,
            crate::store::SessionStatus::QrCodeRequired
        );
    }

    #[tokio::test]
    async fn full_sync_runs_all_passes_when_connected() {
        let (store, session) = seeded().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"sessions": [{"id": 7, "sessionId": "baileys-1",
                                        "status": "connected",
                                        "phoneNumber": "34699999999"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/contacts/baileys-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"contacts": [{"id": "34600000000@c.us", "name": "Ana"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/messages/baileys-1/chats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"chats": [{"chatId": "34600000000@s.whatsapp.net",
                                     "lastMessage": {"content": "hola",
                                                     "timestamp": 1_700_000_000}}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/messages/baileys-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"messages": [{"whatsappMessageId": "M1", "content": "hola",
                                        "status": "delivered"}]}
            })))
            .mount(&server)
            .await;

        let report = sync_session(&store, &client(&server), &session, &SyncConfig::default())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.contacts.created, 1);
        assert_eq!(report.chats.created, 1);
        assert_eq!(report.messages.created, 1);

        let refreshed = store.get_session(&session.id).await.unwrap().unwrap();
        assert!(refreshed.is_connected);
        assert_eq!(refreshed.session_db_id, Some(7));
        assert_eq!(refreshed.phone_number.as_deref(), Some("34699999999"));
        assert_eq!(refreshed.total_contacts, 1);
        assert_eq!(refreshed.total_chats, 1);
        assert_eq!(refreshed.total_messages, 1);
    }
}
