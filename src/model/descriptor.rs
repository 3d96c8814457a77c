use std::fmt;
use std::sync::Arc;

use image::RgbImage;

use crate::error::VisionError;
use crate::model::backend::ClassifierBackend;
use crate::model::labels::LabelTable;

/// Zero-arg lazy constructor for a classification backend.
pub type ClassifierLoader =
    Box<dyn Fn() -> Result<Arc<dyn ClassifierBackend>, VisionError> + Send + Sync>;

/// Per-model pixel normalization applied after resizing.
///
/// These mirror what each wrapped model family expects at its input:
/// MobileNetV2 takes [-1, 1], EfficientNetV2 rescales internally and takes
/// raw [0, 255] floats, and the hosted flower classifier takes [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preprocess {
    /// Pass pixel values through as 0..255 floats.
    Identity,
    /// Scale to [-1, 1] (`x / 127.5 - 1`).
    MinusOneToOne,
    /// Scale to [0, 1] (`x / 255`).
    ZeroToOne,
}

impl Preprocess {
    pub fn apply(self, value: f32) -> f32 {
        match self {
            Preprocess::Identity => value,
            Preprocess::MinusOneToOne => value / 127.5 - 1.0,
            Preprocess::ZeroToOne => value / 255.0,
        }
    }
}

/// Decode policy: how a backend's raw score vector indexes into its label
/// space. Backends with structurally different raw output shapes hide
/// behind this one seam.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decode {
    /// 1000-way output, score index i names label i.
    Imagenet,
    /// 1001-way hosted-hub output with a leading background score; label
    /// ids are shifted down by one and the background entry never ranks.
    ImagenetShifted,
}

impl Decode {
    /// Rank raw scores into at least `top_k` (label, probability)
    /// candidates, highest first. Scores are clamped into [0, 1]; labels
    /// absent from the table degrade to `"class {id}"`.
    pub fn rank(self, scores: &[f32], top_k: usize, labels: &LabelTable) -> Vec<(String, f32)> {
        let skip = match self {
            Decode::Imagenet => 0usize,
            Decode::ImagenetShifted => 1usize,
        };

        let mut indexed: Vec<(usize, f32)> = scores
            .iter()
            .copied()
            .enumerate()
            .skip(skip)
            .collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
        indexed.truncate(top_k);

        indexed
            .into_iter()
            .map(|(raw_idx, score)| {
                let label_id = (raw_idx - skip) as i64;
                let label = match labels.get(label_id) {
                    Some(name) => name.replace('_', " "),
                    None => format!("class {}", label_id),
                };
                (label, score.clamp(0.0, 1.0))
            })
            .collect()
    }
}

/// Immutable metadata + capability bundle identifying one model.
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    /// Model input size as (width, height).
    pub input_shape: (u32, u32),
    pub preprocess: Preprocess,
    pub decode: Decode,
    pub loader: ClassifierLoader,
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("input_shape", &self.input_shape)
            .field("preprocess", &self.preprocess)
            .field("decode", &self.decode)
            .finish_non_exhaustive()
    }
}

impl ModelDescriptor {
    /// Resize and normalize an image into this model's input tensor.
    pub fn prepare(&self, image: &RgbImage) -> InputTensor {
        let (width, height) = self.input_shape;
        let resized = image::imageops::resize(
            image,
            width,
            height,
            image::imageops::FilterType::Triangle,
        );
        let data = resized
            .pixels()
            .flat_map(|pixel| pixel.0)
            .map(|value| self.preprocess.apply(value as f32))
            .collect();
        InputTensor {
            data,
            width,
            height,
        }
    }
}

/// Preprocessed model input: interleaved RGB floats, row-major.
#[derive(Clone, Debug)]
pub struct InputTensor {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl InputTensor {
    /// Value at (x, y, channel). Callers building planar layouts use this.
    pub fn at(&self, x: u32, y: u32, channel: usize) -> f32 {
        let idx = (y * self.width + x) as usize * 3 + channel;
        self.data[idx]
    }
}
