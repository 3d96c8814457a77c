use image::RgbImage;

use crate::error::VisionError;
use crate::model::descriptor::InputTensor;

/// Classification backend: a loaded, invocable model for one descriptor.
///
/// Implementations are constructed once by the cache and invoked through
/// `&self` from many requests concurrently; they must not mutate internal
/// state during `infer`.
pub trait ClassifierBackend: Send + Sync {
    /// Descriptor id this backend was built for.
    fn id(&self) -> &str;

    /// Run the model on a preprocessed tensor and return per-label scores
    /// in probability space. The score vector's length is the backend's raw
    /// output width, which may not match the advertised label set; the
    /// descriptor's decode policy owns that mapping.
    fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, VisionError>;
}

/// Raw detector output before normalization.
///
/// Boxes are `[yMin, xMin, yMax, xMax]` in normalized [0, 1] coordinates,
/// the ordering the wrapped detector families emit. The three vectors are
/// parallel; `DetectionPipeline` is the only consumer and converts them to
/// the stable result schema.
#[derive(Clone, Debug, Default)]
pub struct RawDetections {
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub classes: Vec<i64>,
}

impl RawDetections {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Detection backend: takes raw pixels, returns raw boxes/scores/classes.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier, persisted as the model name in history.
    fn name(&self) -> &str;

    /// Run detection on a full-resolution RGB image.
    fn detect(&self, image: &RgbImage) -> Result<RawDetections, VisionError>;
}
