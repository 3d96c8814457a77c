#![cfg(feature = "hosted-models")]

//! Fetches hosted model artifacts into the weights directory.
//!
//! Hosted models are published as ONNX exports under a base URL supplied
//! by the operator (`VISION_MODEL_BASE_URL`). An artifact is fetched once;
//! later loads reuse the cached file. Fetch failures are `BackendLoad`
//! errors, so the backend cache stays retryable.

use std::io::Read;
use std::path::{Path, PathBuf};

use url::Url;

use crate::error::VisionError;

const BASE_URL_ENV: &str = "VISION_MODEL_BASE_URL";

fn artifact_url(id: &str) -> Result<Url, VisionError> {
    let base = std::env::var(BASE_URL_ENV).map_err(|_| {
        VisionError::backend_load(
            id,
            format!("{} must name the hosted model base URL", BASE_URL_ENV),
        )
    })?;
    let base: Url = base
        .parse()
        .map_err(|e| VisionError::backend_load(id, format!("invalid {}: {}", BASE_URL_ENV, e)))?;
    base.join(&format!("{}.onnx", id))
        .map_err(|e| VisionError::backend_load(id, format!("invalid artifact URL: {}", e)))
}

/// Ensure the hosted artifact for `id` exists under the weights directory,
/// fetching it on first use. Returns the local path.
pub fn ensure_fetched(weights_dir: &str, id: &str) -> Result<PathBuf, VisionError> {
    let dest = Path::new(weights_dir).join(format!("{}.onnx", id));
    if dest.exists() {
        return Ok(dest);
    }

    let url = artifact_url(id)?;
    log::info!("fetching hosted model '{}' from {}", id, url);

    let response = ureq::get(url.as_str())
        .call()
        .map_err(|e| VisionError::backend_load(id, format!("fetch failed: {}", e)))?;
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| VisionError::backend_load(id, format!("fetch read failed: {}", e)))?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| VisionError::backend_load(id, format!("weights dir: {}", e)))?;
    }
    // Write to a sibling temp file first so a partial download never looks
    // like a cached artifact.
    let staging = dest.with_extension("onnx.part");
    std::fs::write(&staging, &body)
        .map_err(|e| VisionError::backend_load(id, format!("write failed: {}", e)))?;
    std::fs::rename(&staging, &dest)
        .map_err(|e| VisionError::backend_load(id, format!("rename failed: {}", e)))?;

    log::info!("cached hosted model '{}' at {}", id, dest.display());
    Ok(dest)
}
