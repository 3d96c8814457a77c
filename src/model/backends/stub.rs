use image::RgbImage;
use sha2::{Digest, Sha256};

use crate::error::VisionError;
use crate::model::backend::{ClassifierBackend, DetectorBackend, RawDetections};
use crate::model::descriptor::InputTensor;

/// Raw candidates the stub detector emits before any filtering; more than
/// the pipeline's result cap so the cap is exercised.
const STUB_RAW_DETECTIONS: usize = 64;

fn content_digest(id: &str, bytes: impl Iterator<Item = u8>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    let payload: Vec<u8> = bytes.collect();
    hasher.update(&payload);
    hasher.finalize().into()
}

/// Deterministic classification backend for tests and the `stub://`
/// weights source. Scores are seeded from a content hash, so the same
/// image through the same model id always ranks the same labels, and the
/// top probability stays strictly below 1.0.
pub struct StubClassifier {
    id: String,
    classes: usize,
}

impl StubClassifier {
    pub fn new(id: &str, classes: usize) -> Self {
        Self {
            id: id.to_string(),
            classes,
        }
    }
}

impl ClassifierBackend for StubClassifier {
    fn id(&self) -> &str {
        &self.id
    }

    fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, VisionError> {
        let digest = content_digest(
            &self.id,
            input.data.iter().flat_map(|v| v.to_le_bytes()),
        );

        let mut scores = vec![0.0f32; self.classes];
        let mut weight = 0.5f32;
        for chunk in digest.chunks(2).take(8) {
            let idx = u16::from_le_bytes([chunk[0], chunk[1]]) as usize % self.classes;
            scores[idx] += weight;
            weight *= 0.5;
        }
        Ok(scores)
    }
}

/// Deterministic detection backend for tests and the `stub://` source.
/// Emits a fixed number of pseudo boxes with strictly descending scores
/// and class ids spread across the COCO id range, holes included.
pub struct StubDetector {
    id: String,
}

impl StubDetector {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl DetectorBackend for StubDetector {
    fn name(&self) -> &str {
        &self.id
    }

    fn detect(&self, image: &RgbImage) -> Result<RawDetections, VisionError> {
        let digest = content_digest(&self.id, image.as_raw().iter().copied());

        let mut raw = RawDetections::default();
        let mut score = 0.95f32;
        for i in 0..STUB_RAW_DETECTIONS {
            let a = digest[(i * 7) % 32] as f32 / 255.0;
            let b = digest[(i * 11 + 3) % 32] as f32 / 255.0;

            let y_min = a * 0.6;
            let x_min = b * 0.6;
            let y_max = (y_min + 0.15 + a * 0.2).min(1.0);
            let x_max = (x_min + 0.15 + b * 0.2).min(1.0);
            raw.boxes.push([y_min, x_min, y_max, x_max]);

            raw.scores.push(score);
            score *= 0.96;

            let class_id = (digest[(i * 3 + 1) % 32] as i64 % 90) + 1;
            raw.classes.push(class_id);
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(seed: u8) -> InputTensor {
        InputTensor {
            data: (0..48).map(|i| (i as f32 + seed as f32) / 255.0).collect(),
            width: 4,
            height: 4,
        }
    }

    #[test]
    fn classifier_is_deterministic_per_content_and_model() {
        let backend = StubClassifier::new("mobilenet_v2", 1000);
        let first = backend.infer(&tensor(1)).unwrap();
        let second = backend.infer(&tensor(1)).unwrap();
        assert_eq!(first, second);

        let other_model = StubClassifier::new("efficientnet_v2_b0", 1000);
        assert_ne!(first, other_model.infer(&tensor(1)).unwrap());
    }

    #[test]
    fn classifier_scores_stay_inside_unit_interval() {
        let backend = StubClassifier::new("mobilenet_v2", 1000);
        let scores = backend.infer(&tensor(9)).unwrap();

        assert_eq!(scores.len(), 1000);
        let top = scores.iter().cloned().fold(0.0f32, f32::max);
        assert!(top > 0.0);
        assert!(top < 1.0);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn detector_emits_more_candidates_than_the_result_cap() {
        let backend = StubDetector::new("ssd_mobilenet_v2");
        let image = RgbImage::from_pixel(32, 32, image::Rgb([10, 20, 30]));
        let raw = backend.detect(&image).unwrap();

        assert_eq!(raw.len(), STUB_RAW_DETECTIONS);
        assert!(raw.scores.windows(2).all(|w| w[0] > w[1]));
        assert!(raw.scores.iter().all(|s| (0.0..=1.0).contains(s)));
        for [y_min, x_min, y_max, x_max] in &raw.boxes {
            assert!(y_min < y_max && x_min < x_max);
            assert!(*x_max <= 1.0 && *y_max <= 1.0);
        }
        assert!(raw.classes.iter().all(|c| (1..=90).contains(c)));
    }
}
