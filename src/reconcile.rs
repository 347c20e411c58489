//! Maps vendor session status strings onto the local state set and reflects
//! vendor-reported state into session rows.

use crate::store::{Session, SessionStatus, Store};
use crate::vendor::VendorClient;
use crate::webhook::{parse_timestamp, strip_jid};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

/// Known vendor status keys, most specific first. The order matters for the
/// substring fallback: `disconnected` must be probed before `connected`, and
/// `qr_code_required` before its shorter prefixes.
const STATUS_TABLE: &[(&str, SessionStatus)] = &[
    ("disconnected", SessionStatus::Disconnected),
    ("connecting", SessionStatus::Connecting),
    ("connected", SessionStatus::Connected),
    ("qr_code_required", SessionStatus::QrCodeRequired),
    ("qr_code", SessionStatus::QrCodeRequired),
    ("qr", SessionStatus::QrCodeRequired),
    ("pending", SessionStatus::QrCodeRequired),
    ("rate_limited", SessionStatus::Error),
    ("timeout", SessionStatus::Error),
    ("error", SessionStatus::Error),
];

/// Map a vendor status string onto the local closed set.
///
/// Matching is case-insensitive and trimmed. An exact hit wins; otherwise a
/// substring containment pass tolerates vendor format drift (so
/// `qr_code_required_xyz` still maps via `qr_code_required`). Anything left
/// over maps to `Disconnected` and is logged.
pub fn map_status(raw: &str) -> SessionStatus {
    let normalized = raw.trim().to_ascii_lowercase();

    for (key, status) in STATUS_TABLE {
        if normalized == *key {
            return *status;
        }
    }

    for (key, status) in STATUS_TABLE {
        if normalized.contains(key) {
            tracing::debug!(raw, matched = key, "session status matched by substring");
            return *status;
        }
    }

    tracing::warn!(raw, "unrecognized session status, falling back to disconnected");
    SessionStatus::Disconnected
}

/// Apply a vendor-reported status to a session row.
///
/// Entering Connected refreshes the phone number from the vendor when it was
/// previously unknown; an already-populated number is left untouched. Leaving
/// Connected zeroes the connectivity flag but preserves historical data.
pub async fn apply_session_status(
    store: &Store,
    session: &Session,
    raw_status: &str,
    phone_number: Option<&str>,
) -> Result<SessionStatus> {
    let mapped = map_status(raw_status);
    let is_connected = mapped == SessionStatus::Connected;

    store
        .update_session_status(&session.id, mapped, is_connected)
        .await?;

    if is_connected
        && session
            .phone_number
            .as_deref()
            .is_none_or(|current| current.is_empty())
        && let Some(phone) = phone_number.filter(|p| !p.is_empty())
    {
        store.set_session_phone(&session.id, phone).await?;
    }

    Ok(mapped)
}

// ─── Vendor polling ─────────────────────────────────────────────────────────

/// Result of one status poll, serialized for the CLI and API callers.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub is_connected: bool,
    pub phone_number: Option<String>,
    pub found_remotely: bool,
}

/// The session list endpoint wraps its items differently across vendor
/// versions: `data.items`, `data.sessions`, `data.data`, a bare `data`
/// array, or a top-level `sessions` array.
pub fn extract_sessions(payload: &Value) -> Vec<Value> {
    match payload.get("data") {
        Some(Value::Object(data)) => {
            for key in ["items", "sessions", "data"] {
                if let Some(Value::Array(items)) = data.get(key) {
                    return items.clone();
                }
            }
        }
        Some(Value::Array(items)) => return items.clone(),
        _ => {}
    }

    if let Some(Value::Array(sessions)) = payload.get("sessions") {
        return sessions.clone();
    }

    Vec::new()
}

fn matches_session(candidate: &Value, session: &Session) -> bool {
    if candidate.get("sessionId").and_then(Value::as_str) == Some(session.session_id.as_str()) {
        return true;
    }
    match (candidate.get("id"), session.session_db_id) {
        (Some(id), Some(db_id)) => {
            id.as_i64() == Some(db_id) || id.as_str() == Some(db_id.to_string().as_str())
        }
        _ => false,
    }
}

/// Poll the vendor session list and reconcile one local session against it.
/// A session missing from the vendor's list is marked Disconnected locally.
pub async fn poll_session_status(
    store: &Store,
    vendor: &VendorClient,
    session: &Session,
) -> Result<StatusReport> {
    let response = vendor.list_sessions(1, 200, None).await?;
    let remote_sessions = extract_sessions(&response);

    let Some(remote) = remote_sessions
        .iter()
        .find(|candidate| matches_session(candidate, session))
    else {
        store
            .update_session_status(&session.id, SessionStatus::Disconnected, false)
            .await?;
        return Ok(StatusReport {
            session_id: session.session_id.clone(),
            status: SessionStatus::Disconnected,
            is_connected: false,
            phone_number: session.phone_number.clone(),
            found_remotely: false,
        });
    };

    let raw_status = remote
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("disconnected");
    let phone_number = remote
        .get("phoneNumber")
        .and_then(Value::as_str)
        .or_else(|| remote.get("msisdn").and_then(Value::as_str))
        .map(strip_jid);

    let mapped = apply_session_status(store, session, raw_status, phone_number.as_deref()).await?;

    if let Some(db_id) = remote.get("id").and_then(Value::as_i64) {
        store.set_session_db_id(&session.id, db_id).await?;
    }

    if let Some(last_activity) = remote
        .get("lastActivity")
        .or_else(|| remote.get("lastSeen"))
        .filter(|v| !v.is_null())
    {
        store
            .set_session_last_activity(&session.id, parse_timestamp(Some(last_activity)))
            .await?;
    }

    let refreshed = store.get_session(&session.id).await?;
    Ok(StatusReport {
        session_id: session.session_id.clone(),
        status: mapped,
        is_connected: mapped == SessionStatus::Connected,
        phone_number: refreshed.and_then(|s| s.phone_number).or(phone_number),
        found_remotely: true,
    })
}
