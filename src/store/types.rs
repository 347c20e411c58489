use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Session ────────────────────────────────────────────────────────────────

/// Connection state of a registered WhatsApp number on the vendor gateway.
///
/// Closed set: every vendor status string maps onto exactly one of these
/// (see `reconcile::map_status`). Sessions are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    QrCodeRequired,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::QrCodeRequired => "qr_code_required",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "qr_code_required" => Ok(Self::QrCodeRequired),
            "error" => Ok(Self::Error),
            _ => anyhow::bail!("unknown session status: {value}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    /// External gateway identifier (`sessionId`).
    pub session_id: String,
    /// Numeric id of the session row in the vendor's own database.
    pub session_db_id: Option<i64>,
    pub phone_number: Option<String>,
    pub status: SessionStatus,
    pub is_connected: bool,
    /// Latest QR payload delivered by a `session.qr` event.
    pub qr_code: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub total_contacts: i64,
    pub total_chats: i64,
    pub total_messages: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Conversation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub session_id: String,
    /// Vendor chat identifier, suffix preserved (`…@s.whatsapp.net`).
    pub chat_id: String,
    pub contact_name: Option<String>,
    pub phone_number: String,
    pub contact_id: Option<String>,
    pub is_group: bool,
    pub unread_count: i64,
    pub is_archived: bool,
    pub is_pinned: bool,
    pub is_muted: bool,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_message_from_me: bool,
    pub lead_ref: Option<String>,
    pub customer_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to lazily create a conversation on first sight of a chat id.
#[derive(Debug, Clone)]
pub struct NewConversation<'a> {
    pub session_id: &'a str,
    pub chat_id: &'a str,
    pub contact_name: Option<&'a str>,
    pub phone_number: &'a str,
    pub contact_id: Option<&'a str>,
    pub is_group: bool,
}

// ─── Message ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "incoming" => Ok(Self::Incoming),
            "outgoing" => Ok(Self::Outgoing),
            _ => anyhow::bail!("unknown direction: {value}"),
        }
    }
}

/// Delivery lifecycle: Pending → Sent → Delivered → Read (Played for voice),
/// or Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Played,
    Failed,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Played => "played",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "played" => Ok(Self::Played),
            "failed" => Ok(Self::Failed),
            _ => anyhow::bail!("unknown message status: {value}"),
        }
    }

    /// Vendor status string → local status. Unrecognized values fall back to
    /// `Pending`, mirroring the webhook's historical behavior.
    pub fn from_vendor(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "sent" => Self::Sent,
            "delivered" | "received" => Self::Delivered,
            "read" => Self::Read,
            "played" => Self::Played,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub conversation_id: String,
    /// External message identifier, unique per session, never reassigned.
    pub message_id: String,
    pub content: String,
    pub direction: Direction,
    pub status: MessageStatus,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub from_me: bool,
    pub has_media: bool,
    pub media_path: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub session_id: &'a str,
    pub conversation_id: &'a str,
    pub message_id: &'a str,
    pub content: &'a str,
    pub direction: Direction,
    pub status: MessageStatus,
    pub message_type: &'a str,
    pub timestamp: DateTime<Utc>,
    pub from_number: Option<&'a str>,
    pub to_number: Option<&'a str>,
    pub from_me: bool,
    pub has_media: bool,
}

// ─── Reaction ───────────────────────────────────────────────────────────────

/// At most one live reaction per (message, reactor) pair; an empty incoming
/// emoji removes the reaction instead of storing a blank row.
#[derive(Debug, Clone, Serialize)]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    pub reacted_by: String,
    pub emoji: String,
    pub reacted_at: DateTime<Utc>,
}

// ─── Contact ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub id: String,
    pub session_id: String,
    /// Vendor JID of the contact.
    pub contact_id: Option<String>,
    pub phone_number: String,
    pub contact_name: Option<String>,
    pub pushname: Option<String>,
    pub verified_name: Option<String>,
    pub profile_pic_url: Option<String>,
    pub is_user: bool,
    pub is_group: bool,
    pub is_wa_contact: bool,
    pub lead_ref: Option<String>,
    pub customer_ref: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub contact_id: Option<String>,
    pub contact_name: Option<String>,
    pub pushname: Option<String>,
    pub verified_name: Option<String>,
    pub profile_pic_url: Option<String>,
    pub is_user: Option<bool>,
    pub is_group: Option<bool>,
    pub is_wa_contact: Option<bool>,
}
