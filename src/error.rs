use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for warelay.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Store ────────────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Vendor API ──────────────────────────────────────────────────────
    #[error("vendor: {0}")]
    Vendor(#[from] VendorError),

    // ── Webhook ingestion ───────────────────────────────────────────────
    #[error("webhook: {0}")]
    Webhook(#[from] WebhookError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Store errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("sqlx: {0}")]
    Sqlx(String),
}

// ─── Vendor API errors ──────────────────────────────────────────────────────

/// Error taxonomy for outbound gateway calls.
///
/// `Transport` covers timeouts and connection failures after the retry budget
/// is exhausted. `Api` carries the vendor's own 4xx/5xx message verbatim;
/// 4xx responses (other than 429) are terminal and never retried.
#[derive(Debug, Error)]
pub enum VendorError {
    #[error("request failed after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    #[error("vendor API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl VendorError {
    /// Status code of the vendor response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ─── Webhook errors ─────────────────────────────────────────────────────────

/// Webhook rejection reasons. Display strings double as the `error` field of
/// the acknowledgment body, so they keep the wire spelling.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Empty payload")]
    EmptyPayload,

    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_correctly() {
        let err = RelayError::Config(ConfigError::Validation("missing base_url".into()));
        assert!(err.to_string().contains("validation failed"));
    }

    #[test]
    fn vendor_api_error_carries_status() {
        let err = VendorError::Api {
            status: 404,
            message: "Session not found".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn vendor_transport_error_has_no_status() {
        let err = VendorError::Transport {
            attempts: 3,
            message: "connection refused".into(),
        };
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn store_error_displays_correctly() {
        let err = RelayError::Store(StoreError::SessionNotFound("baileys-1".into()));
        assert!(err.to_string().contains("session not found: baileys-1"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let relay_err: RelayError = anyhow_err.into();
        assert!(relay_err.to_string().contains("something went wrong"));
    }

    #[test]
    fn webhook_error_displays_correctly() {
        let err = RelayError::Webhook(WebhookError::InvalidData("Chat ID missing".into()));
        assert!(err.to_string().contains("Chat ID missing"));
    }
}
