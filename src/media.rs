//! Fire-and-forget media downloads.
//!
//! The webhook handler only enqueues a `(session, message)` reference; a
//! background worker fetches the media through the vendor API and records
//! the stored path on the message row. Nothing awaits the result; worker
//! failures are logged and dropped.

use crate::store::Store;
use crate::vendor::VendorClient;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MediaJob {
    /// Vendor session id, used in the API path.
    pub session_id: String,
    /// Local message row id the stored path is written back to.
    pub message_row_id: String,
    /// External message id the vendor keys media by.
    pub external_message_id: String,
}

#[derive(Clone)]
pub struct MediaQueue {
    tx: mpsc::UnboundedSender<MediaJob>,
}

impl MediaQueue {
    pub fn enqueue(&self, job: MediaJob) {
        if self.tx.send(job).is_err() {
            tracing::warn!("media worker gone, dropping download job");
        }
    }
}

/// Spawn the download worker and hand back the enqueue side.
pub fn spawn_media_worker(
    store: Store,
    vendor: Arc<VendorClient>,
    media_dir: PathBuf,
) -> MediaQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<MediaJob>();

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if let Err(error) = download_one(&store, &vendor, &media_dir, &job).await {
                tracing::warn!(
                    message_id = job.external_message_id.as_str(),
                    error = %error,
                    "media download failed"
                );
            }
        }
    });

    MediaQueue { tx }
}

async fn download_one(
    store: &Store,
    vendor: &VendorClient,
    media_dir: &Path,
    job: &MediaJob,
) -> Result<()> {
    let metadata = vendor
        .message_media(&job.session_id, &job.external_message_id)
        .await
        .context("fetch media metadata")?;

    let data = metadata.get("data").cloned().unwrap_or(Value::Null);
    let url = data
        .get("url")
        .or_else(|| data.get("media_url"))
        .and_then(Value::as_str)
        .context("media metadata carries no url")?;

    let bytes = vendor.fetch_media_bytes(url).await.context("fetch media bytes")?;

    let filename = data
        .get("filename")
        .and_then(Value::as_str)
        .map(sanitize_filename)
        .unwrap_or_else(|| format!("media_{}", sanitize_filename(&job.external_message_id)));

    tokio::fs::create_dir_all(media_dir)
        .await
        .context("create media directory")?;
    let path = media_dir.join(filename);
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("write media file {}", path.display()))?;

    store
        .set_message_media_path(&job.message_row_id, &path.to_string_lossy())
        .await?;

    tracing::info!(
        message_id = job.external_message_id.as_str(),
        bytes = bytes.len(),
        "media downloaded"
    );
    Ok(())
}

/// Keep vendor-supplied names from escaping the media directory.
fn sanitize_filename(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
