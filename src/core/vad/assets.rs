//! VAD model weight fetching.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

/// Make sure the model file exists, downloading it when missing.
///
/// Follows up to 5 redirects, writes to disk only on a 2xx response, and
/// rejects an empty download.
pub async fn ensure_model(path: &Path, url: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if url.is_empty() {
        anyhow::bail!("VAD model file missing and no VAD_MODEL_URL configured");
    }

    info!(path = %path.display(), url, "VAD model file missing, downloading");

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .context("Failed to build download client")?;

    let response = client
        .get(url)
        .header("User-Agent", "voxlink/0.3")
        .send()
        .await
        .context("VAD model download request failed")?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("VAD model download failed with status {status}");
    }

    let body = response
        .bytes()
        .await
        .context("VAD model download body read failed")?;
    if body.is_empty() {
        anyhow::bail!("VAD model download produced an empty file");
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create model directory")?;
    }
    tokio::fs::write(path, &body)
        .await
        .context("Failed to write model file")?;

    info!(path = %path.display(), bytes = body.len(), "VAD model downloaded");
    Ok(())
}
