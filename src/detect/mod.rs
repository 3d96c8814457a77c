//! Detection pipeline: raw boxes/scores/classes normalized into the
//! stable result schema.
//!
//! Raw detector output arrives as normalized `[yMin, xMin, yMax, xMax]`
//! boxes. Normalization converts to `(x1, y1, x2, y2)` order, produces
//! both normalized and pixel coordinates against the source image's true
//! size, filters by score, caps the result count, and resolves labels
//! through a sparse table whose holes degrade to formatted ids.

mod labels;
#[cfg(feature = "annotate")]
mod yolo;

pub use labels::coco_labels;
#[cfg(feature = "annotate")]
pub use yolo::{YoloOutcome, YoloRunner};

use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;

use crate::error::VisionError;
use crate::model::{BackendCache, DetectorBackend, DetectorLoader, LabelTable};

/// Hard cap on returned detections, bounding response size.
pub const MAX_DETECTIONS: usize = 50;

/// One normalized detection.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionItem {
    /// `(x1, y1, x2, y2)` in source-image pixels.
    pub box_pixels: [i64; 4],
    /// `(x1, y1, x2, y2)` as fractions of image width/height.
    pub box_normalized: [f32; 4],
    pub score: f32,
    pub class_id: i64,
    pub label: String,
}

/// Normalized detection outcome for one image.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionResult {
    pub image_width: u32,
    pub image_height: u32,
    pub items: Vec<DetectionItem>,
}

/// The detection half of the inference core.
pub struct DetectionPipeline {
    detector_id: String,
    loader: DetectorLoader,
    cache: BackendCache<dyn DetectorBackend>,
    labels: LabelTable,
}

impl DetectionPipeline {
    pub fn new(detector_id: String, loader: DetectorLoader) -> Self {
        Self {
            detector_id,
            loader,
            cache: BackendCache::new(),
            labels: coco_labels(),
        }
    }

    /// Id of the backing detector, persisted as the model name in history.
    pub fn detector_id(&self) -> &str {
        &self.detector_id
    }

    fn backend(&self) -> Result<Arc<dyn DetectorBackend>, VisionError> {
        self.cache
            .get_or_create(&self.detector_id, || (self.loader)())
    }

    /// Detect objects in an image, keeping items with
    /// `score >= score_threshold`, at most `MAX_DETECTIONS` of them,
    /// highest score first.
    pub fn detect(
        &self,
        image: &RgbImage,
        score_threshold: f32,
    ) -> Result<DetectionResult, VisionError> {
        let backend = self.backend()?;
        let raw = backend.detect(image)?;

        let (width, height) = image.dimensions();
        let mut items: Vec<DetectionItem> = raw
            .boxes
            .iter()
            .zip(raw.scores.iter())
            .zip(raw.classes.iter())
            .filter(|((_, score), _)| **score >= score_threshold)
            .map(|(([y_min, x_min, y_max, x_max], score), class_id)| DetectionItem {
                box_pixels: [
                    (x_min * width as f32) as i64,
                    (y_min * height as f32) as i64,
                    (x_max * width as f32) as i64,
                    (y_max * height as f32) as i64,
                ],
                box_normalized: [*x_min, *y_min, *x_max, *y_max],
                score: *score,
                class_id: *class_id,
                label: self.labels.label_or_id(*class_id),
            })
            .collect();

        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        items.truncate(MAX_DETECTIONS);

        Ok(DetectionResult {
            image_width: width,
            image_height: height,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawDetections;

    /// Fixed-output detector for exercising normalization edge cases.
    struct FixedDetector {
        raw: RawDetections,
    }

    impl DetectorBackend for FixedDetector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(&self, _image: &RgbImage) -> Result<RawDetections, VisionError> {
            Ok(self.raw.clone())
        }
    }

    fn pipeline_with(raw: RawDetections) -> DetectionPipeline {
        DetectionPipeline::new(
            "fixed".to_string(),
            Box::new(move || Ok(Arc::new(FixedDetector { raw: raw.clone() }) as Arc<dyn DetectorBackend>)),
        )
    }

    fn stub_pipeline() -> DetectionPipeline {
        let cfg = crate::config::ServeConfig::default();
        let (id, loader) = crate::model::builtin_detector(&cfg);
        DetectionPipeline::new(id, loader)
    }

    fn test_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 128]))
    }

    #[test]
    fn boxes_are_reordered_and_scaled_to_pixels() {
        let raw = RawDetections {
            boxes: vec![[0.1, 0.2, 0.5, 0.8]],
            scores: vec![0.9],
            classes: vec![1],
        };
        let pipeline = pipeline_with(raw);
        let result = pipeline.detect(&test_image(200, 100), 0.0).unwrap();

        assert_eq!(result.image_width, 200);
        assert_eq!(result.image_height, 100);
        let item = &result.items[0];
        // yMin,xMin,yMax,xMax = 0.1,0.2,0.5,0.8 → x1,y1,x2,y2
        assert_eq!(item.box_normalized, [0.2, 0.1, 0.8, 0.5]);
        assert_eq!(item.box_pixels, [40, 10, 160, 50]);
        assert_eq!(item.label, "person");
    }

    #[test]
    fn threshold_filters_and_cap_bounds_the_result() {
        // The stub emits more raw candidates than the cap allows through.
        let result = stub_pipeline().detect(&test_image(64, 64), 0.0).unwrap();
        assert_eq!(result.items.len(), MAX_DETECTIONS);
        assert!(result.items.windows(2).all(|w| w[0].score >= w[1].score));

        // Scores never exceed 1.0, so this threshold excludes everything.
        let empty = stub_pipeline().detect(&test_image(64, 64), 1.01).unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn label_table_holes_render_as_formatted_ids() {
        let raw = RawDetections {
            boxes: vec![[0.0, 0.0, 0.5, 0.5], [0.0, 0.0, 0.5, 0.5]],
            scores: vec![0.9, 0.8],
            classes: vec![12, 91],
        };
        let pipeline = pipeline_with(raw);
        let result = pipeline.detect(&test_image(10, 10), 0.0).unwrap();

        // 12 and 91 are holes in the COCO table.
        assert_eq!(result.items[0].label, "id 12");
        assert_eq!(result.items[1].label, "id 91");
    }

    #[test]
    fn detector_backend_is_constructed_once() {
        let pipeline = stub_pipeline();
        let image = test_image(32, 32);
        let first = pipeline.detect(&image, 0.4).unwrap();
        let second = pipeline.detect(&image, 0.4).unwrap();
        assert_eq!(first.items.len(), second.items.len());
        assert_eq!(pipeline.cache.len(), 1);
    }
}
