use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use warelay::config::Config;
use warelay::error::StoreError;
use warelay::gateway::{AppState, run_gateway};
use warelay::media::spawn_media_worker;
use warelay::reconcile;
use warelay::store::Store;
use warelay::sync::sync_session;
use warelay::vendor::VendorClient;

#[derive(Parser)]
#[command(
    name = "warelay",
    about = "Webhook ingestion and session reconciliation for an external WhatsApp gateway",
    version
)]
struct Cli {
    /// Path to config.toml (defaults to ~/.warelay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook gateway
    Serve {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Register a local session for a vendor session id
    Register {
        /// Vendor session id (Baileys `sessionId`)
        session: String,
        /// Registered phone number, if already known
        #[arg(long)]
        phone: Option<String>,
    },
    /// Poll the vendor and reconcile one session's status
    Status {
        /// Vendor session id
        session: String,
    },
    /// Run a full contact/chat/message sync for one session
    Sync {
        /// Vendor session id
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            serve(&config).await
        }
        Commands::Register { session, phone } => {
            let store = open_store(&config).await?;
            let created = store.create_session(&session, phone.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
            Ok(())
        }
        Commands::Status { session } => {
            let store = open_store(&config).await?;
            let vendor = VendorClient::from_config(&config.vendor)?;
            let session = require_session(&store, &session).await?;
            let report = reconcile::poll_session_status(&store, &vendor, &session).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Sync { session } => {
            let store = open_store(&config).await?;
            let vendor = VendorClient::from_config(&config.vendor)?;
            let session = require_session(&store, &session).await?;
            let report = sync_session(&store, &vendor, &session, &config.sync).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.database.resolved_path())
        .await
        .context("open relay store")
}

async fn require_session(store: &Store, session_id: &str) -> Result<warelay::store::Session> {
    match store.find_session(session_id).await? {
        Some(session) => Ok(session),
        None => Err(anyhow::Error::new(StoreError::SessionNotFound(
            session_id.to_owned(),
        ))
        .context(format!("run `warelay register {session_id}` first"))),
    }
}

async fn serve(config: &Config) -> Result<()> {
    let store = open_store(config).await?;

    // Webhook ingestion works without the vendor client; only background
    // media downloads need it.
    let media = match VendorClient::from_config(&config.vendor) {
        Ok(vendor) => {
            let media_dir = config
                .database
                .resolved_path()
                .parent()
                .map(|parent| parent.join("media"))
                .unwrap_or_else(|| PathBuf::from("media"));
            Some(spawn_media_worker(store.clone(), Arc::new(vendor), media_dir))
        }
        Err(error) => {
            tracing::warn!(error = %error, "vendor API not configured, media downloads disabled");
            None
        }
    };

    if config.gateway.webhook_secret.is_none() {
        tracing::warn!("no webhook secret configured, unsigned webhooks will be accepted");
    }

    let state = AppState {
        store,
        media,
        webhook_secret: config
            .gateway
            .webhook_secret
            .as_deref()
            .map(Arc::from),
    };

    run_gateway(config, state).await
}
