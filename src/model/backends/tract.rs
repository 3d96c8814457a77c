#![cfg(feature = "backend-tract")]

//! ONNX inference backends built on tract.
//!
//! Classifiers run a fixed-size NCHW float graph; the detector runs the
//! SSD-style NHWC uint8 export and expects the conventional
//! (boxes, scores, classes) output ordering.

use std::path::Path;

use image::RgbImage;
use tract_onnx::prelude::*;

use crate::error::VisionError;
use crate::model::backend::{ClassifierBackend, DetectorBackend, RawDetections};
use crate::model::descriptor::InputTensor;

const DETECTOR_INPUT_SIZE: u32 = 640;

fn load_plan(
    path: &Path,
    id: &str,
    fact: InferenceFact,
) -> Result<TypedSimplePlan<TypedModel>, VisionError> {
    tract_onnx::onnx()
        .model_for_path(path)
        .map_err(|e| {
            VisionError::backend_load(
                id,
                format!("failed to load ONNX model from {}: {}", path.display(), e),
            )
        })?
        .with_input_fact(0, fact)
        .map_err(|e| VisionError::backend_load(id, format!("failed to set input fact: {}", e)))?
        .into_optimized()
        .map_err(|e| VisionError::backend_load(id, format!("failed to optimize model: {}", e)))?
        .into_runnable()
        .map_err(|e| VisionError::backend_load(id, format!("failed to build runnable model: {}", e)))
}

/// File-backed classification backend.
pub struct TractClassifier {
    id: String,
    plan: TypedSimplePlan<TypedModel>,
    width: u32,
    height: u32,
}

impl TractClassifier {
    pub fn load(path: &Path, id: &str, input_shape: (u32, u32)) -> Result<Self, VisionError> {
        let (width, height) = input_shape;
        let fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, height as usize, width as usize),
        );
        let plan = load_plan(path, id, fact)?;
        Ok(Self {
            id: id.to_string(),
            plan,
            width,
            height,
        })
    }

    fn build_input(&self, input: &InputTensor) -> Result<Tensor, VisionError> {
        if input.width != self.width || input.height != self.height {
            return Err(VisionError::Inference(format!(
                "tensor size {}x{} does not match model input {}x{}",
                input.width, input.height, self.width, self.height
            )));
        }
        let array = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| input.at(x as u32, y as u32, channel),
        );
        Ok(array.into_tensor())
    }
}

impl ClassifierBackend for TractClassifier {
    fn id(&self) -> &str {
        &self.id
    }

    fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, VisionError> {
        let input = self.build_input(input)?;
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| VisionError::Inference(e.to_string()))?;
        let scores = outputs
            .first()
            .ok_or_else(|| VisionError::Inference("model produced no outputs".to_string()))?
            .to_array_view::<f32>()
            .map_err(|e| VisionError::Inference(format!("output tensor was not f32: {}", e)))?;

        let mut scores: Vec<f32> = scores.iter().copied().collect();
        // Exports without a softmax head emit logits; map those into
        // probability space so decode sees [0, 1] scores either way.
        if scores.iter().any(|s| !(0.0..=1.0).contains(s)) {
            softmax_in_place(&mut scores);
        }
        Ok(scores)
    }
}

fn softmax_in_place(scores: &mut [f32]) {
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for score in scores.iter_mut() {
        *score = (*score - max).exp();
        sum += *score;
    }
    if sum > 0.0 {
        for score in scores.iter_mut() {
            *score /= sum;
        }
    }
}

/// File-backed SSD-style detection backend.
pub struct TractDetector {
    id: String,
    plan: TypedSimplePlan<TypedModel>,
}

impl TractDetector {
    pub fn load(path: &Path, id: &str) -> Result<Self, VisionError> {
        let side = DETECTOR_INPUT_SIZE as usize;
        let fact = InferenceFact::dt_shape(u8::datum_type(), tvec!(1, side, side, 3));
        let plan = load_plan(path, id, fact)?;
        Ok(Self {
            id: id.to_string(),
            plan,
        })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized = image::imageops::resize(
            image,
            DETECTOR_INPUT_SIZE,
            DETECTOR_INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let side = DETECTOR_INPUT_SIZE as usize;
        let array = tract_ndarray::Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32).0[c]
        });
        array.into_tensor()
    }
}

impl DetectorBackend for TractDetector {
    fn name(&self) -> &str {
        &self.id
    }

    fn detect(&self, image: &RgbImage) -> Result<RawDetections, VisionError> {
        let outputs = self
            .plan
            .run(tvec!(self.build_input(image).into()))
            .map_err(|e| VisionError::Inference(e.to_string()))?;
        if outputs.len() < 3 {
            return Err(VisionError::Inference(format!(
                "detector produced {} outputs, expected boxes/scores/classes",
                outputs.len()
            )));
        }

        let boxes = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| VisionError::Inference(format!("boxes output was not f32: {}", e)))?;
        let scores = outputs[1]
            .to_array_view::<f32>()
            .map_err(|e| VisionError::Inference(format!("scores output was not f32: {}", e)))?;
        let classes = outputs[2]
            .to_array_view::<f32>()
            .map_err(|e| VisionError::Inference(format!("classes output was not f32: {}", e)))?;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let mut raw = RawDetections::default();
        for (i, chunk) in boxes.chunks_exact(4).enumerate() {
            raw.boxes.push([chunk[0], chunk[1], chunk[2], chunk[3]]);
            raw.scores.push(scores.iter().nth(i).copied().unwrap_or(0.0));
            raw.classes
                .push(classes.iter().nth(i).copied().unwrap_or(0.0) as i64);
        }
        Ok(raw)
    }
}
