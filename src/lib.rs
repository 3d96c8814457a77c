//! Inference core for image classification and object detection.
//!
//! This crate implements the request pipeline behind an image-prediction
//! service: uploaded images are dispatched to one of several interchangeable
//! model backends, heterogeneous raw model outputs are normalized into a
//! stable result schema, and every successful outcome can be appended to a
//! durable SQLite history for later aggregation.
//!
//! # Module Structure
//!
//! - `ingest`: upload boundary (extension policy, image decoding)
//! - `model`: model registry, backend traits, backend cache, label tables
//! - `classify`: classification pipeline (resize, preprocess, decode, filter)
//! - `detect`: detection pipeline (box normalization, thresholding, labels)
//! - `history`: append-only prediction history with aggregate queries
//! - `service`: the facade consumed by the route layer
//!
//! The HTTP layer, templating and upload storage are external collaborators;
//! nothing in this crate binds a socket or renders a page.

pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod history;
pub mod ingest;
pub mod model;
pub mod service;

pub use classify::{Classification, ClassificationPipeline, ClassifyOptions, Prediction, NO_RESULT_LABEL};
pub use config::{DetectionSettings, ServeConfig};
pub use detect::{DetectionItem, DetectionPipeline, DetectionResult, MAX_DETECTIONS};
#[cfg(feature = "annotate")]
pub use detect::{YoloOutcome, YoloRunner};
pub use error::VisionError;
pub use history::{
    ClassificationRecord, DetectionRecord, DetectionRow, HistoryRow, HistoryStore,
};
pub use model::{
    builtin_registry, BackendCache, ClassifierBackend, DetectorBackend, InputTensor, LabelTable,
    ModelDescriptor, ModelInfo, ModelRegistry, RawDetections,
};
pub use service::InferenceService;

/// Current UTC time as an ISO-8601 string with second precision and a
/// trailing `Z`, the format persisted in history rows.
pub(crate) fn utc_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_second_precision_utc() {
        let ts = utc_timestamp();
        assert_eq!(ts.len(), "2024-01-01T00:00:00Z".len());
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }
}
