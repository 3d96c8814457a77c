//! Error taxonomy for the inference core.
//!
//! Each variant maps to a distinct recovery policy at the boundary:
//! bad uploads are rejected, unknown models fall back to the default,
//! backend load failures are retryable, and storage failures never mask a
//! computed inference result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    /// The uploaded bytes could not be decoded as a supported image.
    #[error("unsupported image: {0}")]
    UnsupportedFormat(String),

    /// A model id absent from the registry was named where no fallback
    /// applies (the user-facing path substitutes the default instead).
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// Backend construction failed (missing weights, incompatible runtime).
    /// The cache stays unpoisoned; a later call may retry.
    #[error("backend '{id}' failed to load: {reason}")]
    BackendLoad { id: String, reason: String },

    /// The backend raised during prediction.
    #[error("inference failed: {0}")]
    Inference(String),

    /// A history-store read or write failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Caller-supplied input that could not be parsed or used at all.
    /// Out-of-range but parseable parameters are clamped, not rejected.
    #[error("invalid {name}: {reason}")]
    Validation { name: String, reason: String },
}

impl VisionError {
    pub fn validation(name: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn backend_load(id: &str, reason: impl Into<String>) -> Self {
        Self::BackendLoad {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for VisionError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for VisionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
