//! The facade the route layer consumes.
//!
//! `InferenceService` wires registry, pipelines and history store together
//! from one configuration and exposes the upward boundary: classify,
//! detect, record, and the aggregate queries. It is `Send + Sync`; every
//! method takes `&self` and may be called from concurrent request
//! handlers.

use std::sync::Arc;

use image::RgbImage;

use crate::classify::{Classification, ClassificationPipeline, ClassifyOptions};
use crate::config::ServeConfig;
use crate::detect::{DetectionPipeline, DetectionResult};
use crate::error::VisionError;
use crate::history::{
    ClassificationRecord, DetectionRecord, DetectionRow, HistoryRow, HistoryStore,
};
use crate::model::{builtin_detector, builtin_registry, imagenet_labels, ModelInfo, ModelRegistry};

pub struct InferenceService {
    config: ServeConfig,
    registry: Arc<ModelRegistry>,
    classification: ClassificationPipeline,
    detection: DetectionPipeline,
    store: HistoryStore,
}

impl InferenceService {
    /// Build the service from configuration: registry, pipelines and the
    /// history store (schema brought up to date). Backends stay unloaded
    /// until first use.
    pub fn new(config: ServeConfig) -> Result<Self, VisionError> {
        let registry = Arc::new(builtin_registry(&config)?);
        let labels = Arc::new(imagenet_labels(&config));
        let classification = ClassificationPipeline::new(registry.clone(), labels);

        let (detector_id, detector_loader) = builtin_detector(&config);
        let detection = DetectionPipeline::new(detector_id, detector_loader);

        let store = HistoryStore::open(&config.db_path)?;

        log::info!(
            "inference service ready: models [{}], default '{}', weights '{}', history at '{}'",
            registry.list_ids().join(", "),
            registry.default_id(),
            config.weights,
            config.db_path
        );

        Ok(Self {
            config,
            registry,
            classification,
            detection,
            store,
        })
    }

    pub fn config(&self) -> &ServeConfig {
        &self.config
    }

    /// Registered model ids, sorted.
    pub fn models(&self) -> Vec<String> {
        self.registry.list_ids()
    }

    /// Static per-model display metadata.
    pub fn model_info(&self) -> &std::collections::BTreeMap<String, ModelInfo> {
        self.registry.info()
    }

    /// Classify an image. See `ClassificationPipeline::classify`.
    pub fn classify(
        &self,
        image: &RgbImage,
        options: &ClassifyOptions,
    ) -> Result<Classification, VisionError> {
        self.classification.classify(image, options)
    }

    /// Detect objects with the configured default score threshold.
    pub fn detect_default(&self, image: &RgbImage) -> Result<DetectionResult, VisionError> {
        self.detect(image, self.config.detection.score_threshold)
    }

    /// Detect objects. See `DetectionPipeline::detect`.
    pub fn detect(
        &self,
        image: &RgbImage,
        score_threshold: f32,
    ) -> Result<DetectionResult, VisionError> {
        self.detection.detect(image, score_threshold)
    }

    /// Persist a classification outcome.
    pub fn record(&self, record: &ClassificationRecord) -> Result<i64, VisionError> {
        self.store.insert_classification(record)
    }

    /// Persist an annotated detection outcome.
    pub fn record_detection(&self, record: &DetectionRecord) -> Result<i64, VisionError> {
        self.store.insert_detection(record)
    }

    /// Classify and persist in one step, best-effort on the persistence
    /// side: the computed result is always returned, and a storage
    /// failure surfaces as `history_id = None` with an operator-facing
    /// error log, never as a fabricated history entry.
    pub fn classify_and_record(
        &self,
        image: &RgbImage,
        options: &ClassifyOptions,
        filename: &str,
    ) -> Result<(Classification, Option<i64>), VisionError> {
        let classification = self.classify(image, options)?;

        let top1 = classification.top1();
        let record = ClassificationRecord {
            filename: filename.to_string(),
            top1_label: top1.label.clone(),
            top1_confidence: top1.prob,
            predictions: classification.predictions.clone(),
            model_name: classification.model_id.clone(),
        };
        let history_id = match self.store.insert_classification(&record) {
            Ok(id) => Some(id),
            Err(err) => {
                log::error!(
                    "classification of '{}' succeeded but history insert failed: {}",
                    filename,
                    err
                );
                None
            }
        };
        Ok((classification, history_id))
    }

    /// Run an annotated detection pass and persist its outcome.
    #[cfg(feature = "annotate")]
    pub fn annotate_and_record(
        &self,
        source: &std::path::Path,
        conf: f32,
        iou: f32,
    ) -> Result<(crate::detect::YoloOutcome, i64), VisionError> {
        let runner = crate::detect::YoloRunner::new(&self.config.outputs_dir);
        let outcome = runner.run(&self.detection, source, conf, iou)?;

        let output_relpath = outcome
            .output_path
            .strip_prefix(&self.config.outputs_dir)
            .unwrap_or(&outcome.output_path)
            .to_string_lossy()
            .replace('\\', "/");
        let record = DetectionRecord {
            source_filename: source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_type: "image".to_string(),
            output_relpath,
            classes: outcome.classes.clone(),
            confs: outcome.confs.clone(),
            model: outcome.model.clone(),
            duration_ms: outcome.duration_ms,
            conf: outcome.conf,
            iou: outcome.iou,
        };
        let id = self.store.insert_detection(&record)?;
        Ok((outcome, id))
    }

    /// Top-1 label frequencies across classification history.
    pub fn label_counts(&self, limit: usize) -> Result<Vec<(String, u64)>, VisionError> {
        self.store.label_counts(limit)
    }

    /// Most recent classification rows.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRow>, VisionError> {
        self.store.recent(limit)
    }

    /// Most recent detection rows.
    pub fn recent_detections(&self, limit: usize) -> Result<Vec<DetectionRow>, VisionError> {
        self.store.recent_detections(limit)
    }

    /// One detection row by id.
    pub fn detection_row(&self, id: i64) -> Result<Option<DetectionRow>, VisionError> {
        self.store.detection(id)
    }
}
