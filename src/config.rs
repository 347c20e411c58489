use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub vendor: VendorConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

// ── Gateway (inbound webhook server) ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret for webhook HMAC verification. When unset the gateway
    /// accepts unsigned payloads (fail-open, logged on every acceptance).
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_secret: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8085
}

// ── Vendor (outbound gateway API) ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

// ── Database ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path. Defaults to `<home>/.warelay/warelay.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("warelay.db"))
    }
}

// ── Batch sync ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Contacts fetched per sync pass.
    #[serde(default = "default_contacts_limit")]
    pub contacts_limit: u32,
    /// Chats fetched per sync pass.
    #[serde(default = "default_chats_limit")]
    pub chats_limit: u32,
    /// Messages fetched per conversation per sync pass.
    #[serde(default = "default_messages_limit")]
    pub messages_limit: u32,
    /// Conversations visited by a message sync pass (most recent first).
    #[serde(default = "default_conversations_limit")]
    pub conversations_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contacts_limit: default_contacts_limit(),
            chats_limit: default_chats_limit(),
            messages_limit: default_messages_limit(),
            conversations_limit: default_conversations_limit(),
        }
    }
}

fn default_contacts_limit() -> u32 {
    200
}

fn default_chats_limit() -> u32 {
    50
}

fn default_messages_limit() -> u32 {
    50
}

fn default_conversations_limit() -> u32 {
    10
}

// ── Loading ──────────────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".warelay"))
        .unwrap_or_else(|| PathBuf::from(".warelay"))
}

impl Config {
    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }

    /// Load config from `path` (or the default location). A missing file
    /// yields the built-in defaults so `serve` works out of the box on
    /// localhost; a present-but-broken file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("read config file {}", path.display()))?;
            toml::from_str::<Self>(&raw)
                .with_context(|| format!("parse config file {}", path.display()))?
        } else {
            Self::default()
        };

        config.config_path = path;
        config.apply_env_overrides();
        Ok(config)
    }

    // Priority: environment variable > config file.
    fn apply_env_overrides(&mut self) {
        if let Some(secret) = non_empty_env("WARELAY_WEBHOOK_SECRET") {
            self.gateway.webhook_secret = Some(secret);
        }
        if let Some(key) = non_empty_env("WARELAY_VENDOR_API_KEY") {
            self.vendor.api_key = Some(key);
        }
        if let Some(url) = non_empty_env("WARELAY_VENDOR_BASE_URL") {
            self.vendor.base_url = url;
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
