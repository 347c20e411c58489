//! Normalizes the gateway's heterogeneous webhook payloads into typed events.
//!
//! The vendor's payload shape is inconsistent across message types and API
//! versions: the same logical field arrives under several alternate keys, the
//! event payload may be nested one or two levels deep, and reactions ride
//! inside `message.received` deliveries. Every fallback order here is
//! load-bearing: stored data was written by these exact rules.

use crate::error::WebhookError;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::store::ContactPatch;

// Ordered key lists per canonical field; first non-empty wins.
const MESSAGE_ID_KEYS: &[&str] = &["whatsappMessageId", "messageId", "id"];
const CHAT_ID_KEYS: &[&str] = &["chatId", "remoteJid", "jid"];
const CONTENT_KEYS: &[&str] = &["content", "body", "text", "text_content", "caption"];
const FROM_KEYS: &[&str] = &["from", "sender", "participant", "author"];
const TO_KEYS: &[&str] = &["to", "recipients"];
const TYPE_KEYS: &[&str] = &["type", "messageType"];

/// Milliseconds/seconds discriminator: anything above this is milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

// ─── Canonical records ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub message_id: Option<String>,
    /// Vendor chat identifier, suffix preserved for matching vendor APIs.
    pub chat_id: Option<String>,
    pub content: String,
    /// Sender number, suffix-stripped for internal storage.
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Explicit vendor `fromMe` flag when supplied. Authoritative.
    pub from_me_flag: Option<bool>,
    pub message_type: String,
    pub has_media: bool,
    pub is_group: bool,
}

impl NormalizedMessage {
    /// Direction of the message. The vendor flag wins; without it we fall
    /// back to comparing the sender against the session's own registered
    /// number. The fallback is best-effort only; number formatting is not
    /// guaranteed consistent across vendor fields.
    pub fn direction_is_outgoing(&self, own_number: Option<&str>) -> bool {
        if let Some(flag) = self.from_me_flag {
            return flag;
        }
        match (self.from_number.as_deref(), own_number) {
            (Some(from), Some(own)) if !own.is_empty() => from == strip_jid(own),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedReaction {
    /// External id of the message the reaction targets.
    pub original_message_id: Option<String>,
    /// Empty emoji means "remove the reactor's reaction".
    pub emoji: String,
    pub reacted_by: Option<String>,
    pub reacted_at: DateTime<Utc>,
    pub from_me: bool,
}

impl NormalizedReaction {
    pub fn is_removal(&self) -> bool {
        self.emoji.trim().is_empty()
    }
}

/// Event kinds the router matches exhaustively. Unknown categories survive as
/// `Unknown` so the caller can log and acknowledge them without failing.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    MessageReceived(NormalizedMessage),
    Reaction(NormalizedReaction),
    MessageSent {
        message_id: Option<String>,
    },
    MessageStatus {
        message_id: Option<String>,
        status: Option<String>,
    },
    SessionStatus {
        status: Option<String>,
        phone_number: Option<String>,
    },
    SessionQr {
        qr_code: Option<String>,
    },
    ContactUpdate {
        phone_number: Option<String>,
        patch: ContactPatch,
    },
    ChatUpdate {
        chat_id: Option<String>,
        is_archived: bool,
    },
    Unknown {
        event: String,
    },
}

#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    /// Original event category string, echoed back in the response.
    pub event_name: String,
    pub session_id: Option<String>,
    pub event: WebhookEvent,
}

// ─── Field accessors ────────────────────────────────────────────────────────

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// First non-empty string among the ordered candidate keys.
fn first_str(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(key))
        .find_map(non_empty)
        .map(ToOwned::to_owned)
}

fn first_bool(obj: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter()
        .filter_map(|key| obj.get(key))
        .find_map(Value::as_bool)
}

/// Strip the vendor JID suffix (`@s.whatsapp.net` / `@c.us`) and any leading
/// `+`. Chat ids keep their suffix; this is for phone-number storage only.
pub fn strip_jid(raw: &str) -> String {
    let bare = raw
        .strip_suffix("@s.whatsapp.net")
        .or_else(|| raw.strip_suffix("@c.us"))
        .unwrap_or(raw);
    bare.strip_prefix('+').unwrap_or(bare).to_owned()
}

/// Phone number embedded in a chat identifier (prefix before `@`).
pub fn phone_from_chat_id(chat_id: &str) -> String {
    chat_id
        .split_once('@')
        .map_or(chat_id, |(prefix, _)| prefix)
        .to_owned()
}

/// Timestamps arrive as UNIX seconds, UNIX milliseconds (> 1e12) or ISO-8601
/// with a `Z` suffix. Anything unparseable falls back to now.
pub fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    match value {
        Some(Value::Number(n)) => {
            #[allow(clippy::cast_possible_truncation)]
            let raw = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0);
            let parsed = if raw > MILLIS_THRESHOLD {
                DateTime::<Utc>::from_timestamp_millis(raw)
            } else {
                DateTime::<Utc>::from_timestamp(raw, 0)
            };
            parsed.unwrap_or_else(Utc::now)
        }
        Some(Value::String(s)) => {
            let normalized = s.replace('Z', "+00:00");
            DateTime::parse_from_rfc3339(&normalized)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        }
        _ => Utc::now(),
    }
}

// ─── Payload resolution ─────────────────────────────────────────────────────

/// The event payload may appear under `data`, `message`, `payload`, or be the
/// body itself.
fn resolve_payload(body: &Value) -> &Value {
    for key in ["data", "message", "payload"] {
        if let Some(obj) = body.get(key).filter(|v| v.is_object()) {
            return obj;
        }
    }
    body
}

/// Message fields may be nested one level deeper inside the payload.
fn resolve_message_object(payload: &Value) -> &Value {
    for key in ["message", "payload"] {
        if let Some(obj) = payload.get(key).filter(|v| v.is_object()) {
            return obj;
        }
    }
    payload
}

/// Reaction probing, in this exact order: `payload.reactionMessage`,
/// `payload.message.reactionMessage`, top-level `data.reactionMessage`.
fn resolve_reaction<'a>(body: &'a Value, payload: &'a Value) -> Option<&'a Value> {
    payload
        .get("reactionMessage")
        .filter(|v| v.is_object())
        .or_else(|| {
            payload
                .get("message")
                .and_then(|m| m.get("reactionMessage"))
                .filter(|v| v.is_object())
        })
        .or_else(|| {
            body.get("data")
                .and_then(|d| d.get("reactionMessage"))
                .filter(|v| v.is_object())
        })
}

// ─── Normalization ──────────────────────────────────────────────────────────

/// Normalize one webhook delivery into a typed envelope.
///
/// `header_event` / `header_session` come from `X-Webhook-Event` /
/// `X-Webhook-Session`; both fall back to body fields.
pub fn normalize(
    header_event: Option<&str>,
    header_session: Option<&str>,
    body: &Value,
) -> Result<WebhookEnvelope, WebhookError> {
    let event_name = header_event
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| body.get("event").and_then(non_empty).map(ToOwned::to_owned))
        .ok_or_else(|| WebhookError::InvalidData("event missing".into()))?;

    let payload = resolve_payload(body);

    let session_id = header_session
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| body.get("sessionId").and_then(non_empty).map(ToOwned::to_owned))
        .or_else(|| payload.get("sessionId").and_then(non_empty).map(ToOwned::to_owned));

    // Reactions are intercepted before generic message routing, whatever the
    // nominal event category says.
    if let Some(reaction) = resolve_reaction(body, payload) {
        return Ok(WebhookEnvelope {
            event_name,
            session_id,
            event: WebhookEvent::Reaction(normalize_reaction(reaction, payload)),
        });
    }

    let event = match event_name.as_str() {
        "message.received" => WebhookEvent::MessageReceived(normalize_message(payload)),
        "message.sent" => {
            let message_obj = resolve_message_object(payload);
            WebhookEvent::MessageSent {
                message_id: first_str(message_obj, MESSAGE_ID_KEYS)
                    .or_else(|| first_str(payload, MESSAGE_ID_KEYS)),
            }
        }
        "message.delivered" | "message.read" | "message.played" | "message.failed" => {
            let message_obj = resolve_message_object(payload);
            WebhookEvent::MessageStatus {
                message_id: first_str(payload, MESSAGE_ID_KEYS)
                    .or_else(|| first_str(message_obj, MESSAGE_ID_KEYS)),
                status: first_str(payload, &["status"])
                    .or_else(|| first_str(message_obj, &["status"])),
            }
        }
        "session.connected" | "session.disconnected" | "session.status" => {
            WebhookEvent::SessionStatus {
                status: first_str(payload, &["status"]),
                phone_number: first_str(payload, &["phoneNumber", "msisdn"])
                    .map(|raw| strip_jid(&raw)),
            }
        }
        "session.qr" => WebhookEvent::SessionQr {
            qr_code: first_str(payload, &["qrCode", "qr"]),
        },
        "contact.updated" => normalize_contact_update(payload),
        "chat.archived" | "chat.unarchived" => WebhookEvent::ChatUpdate {
            chat_id: first_str(payload, CHAT_ID_KEYS),
            is_archived: first_bool(payload, &["isArchived"]).unwrap_or(false),
        },
        other => WebhookEvent::Unknown {
            event: other.to_owned(),
        },
    };

    Ok(WebhookEnvelope {
        event_name,
        session_id,
        event,
    })
}

fn normalize_message(payload: &Value) -> NormalizedMessage {
    let message_obj = resolve_message_object(payload);

    let timestamp = parse_timestamp(
        message_obj
            .get("timestamp")
            .or_else(|| payload.get("timestamp")),
    );

    NormalizedMessage {
        message_id: first_str(message_obj, MESSAGE_ID_KEYS),
        chat_id: first_str(message_obj, CHAT_ID_KEYS),
        content: first_str(message_obj, CONTENT_KEYS).unwrap_or_default(),
        from_number: first_str(message_obj, FROM_KEYS).map(|raw| strip_jid(&raw)),
        to_number: first_str(message_obj, TO_KEYS).map(|raw| strip_jid(&raw)),
        timestamp,
        from_me_flag: first_bool(message_obj, &["fromMe"]),
        message_type: first_str(message_obj, TYPE_KEYS).unwrap_or_else(|| "text".to_owned()),
        has_media: first_bool(message_obj, &["has_attachment", "hasMedia"]).unwrap_or(false),
        is_group: first_bool(message_obj, &["isGroup"]).unwrap_or(false),
    }
}

fn normalize_reaction(reaction: &Value, payload: &Value) -> NormalizedReaction {
    let key = reaction.get("key").filter(|v| v.is_object());

    let original_message_id = key
        .and_then(|k| first_str(k, &["id"]))
        .or_else(|| first_str(reaction, MESSAGE_ID_KEYS));

    let reacted_by = key
        .and_then(|k| first_str(k, &["participant", "remoteJid"]))
        .or_else(|| first_str(reaction, FROM_KEYS))
        .or_else(|| first_str(payload, FROM_KEYS))
        .map(|raw| strip_jid(&raw));

    let reacted_at = parse_timestamp(
        reaction
            .get("senderTimestampMs")
            .or_else(|| reaction.get("timestamp"))
            .or_else(|| payload.get("timestamp")),
    );

    let from_me = key
        .and_then(|k| first_bool(k, &["fromMe"]))
        .or_else(|| first_bool(payload, &["fromMe"]))
        .unwrap_or(false);

    NormalizedReaction {
        original_message_id,
        emoji: first_str(reaction, &["text", "emoji"]).unwrap_or_default(),
        reacted_by,
        reacted_at,
        from_me,
    }
}

fn normalize_contact_update(payload: &Value) -> WebhookEvent {
    let contact = payload
        .get("contact")
        .filter(|v| v.is_object())
        .unwrap_or(payload);

    let contact_id = first_str(contact, &["id"]);
    let phone_number = first_str(contact, &["phone", "phoneNumber"])
        .or_else(|| contact_id.clone())
        .map(|raw| strip_jid(&raw));

    WebhookEvent::ContactUpdate {
        phone_number,
        patch: ContactPatch {
            contact_id,
            contact_name: first_str(contact, &["name", "contactName"]),
            pushname: first_str(contact, &["notify", "pushname"]),
            verified_name: first_str(contact, &["verifiedName"]),
            profile_pic_url: first_str(contact, &["imgUrl", "profilePicUrl"]),
            is_user: first_bool(contact, &["isUser"]),
            is_group: first_bool(contact, &["isGroup"]),
            is_wa_contact: first_bool(contact, &["isWAContact"]),
        },
    }
}
