//! Classification pipeline: resize, preprocess, infer, decode, filter.
//!
//! Parameters are clamped before the pipeline runs, and threshold
//! filtering happens strictly after decode. A result is never empty:
//! when the confidence floor removes every candidate, the sentinel entry
//! stands in.

use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::VisionError;
use crate::model::{BackendCache, ClassifierBackend, LabelTable, ModelRegistry};

/// Upper bound on requested result length; larger requests are clamped.
pub const MAX_TOP_K: usize = 5;

/// Label of the sentinel entry substituted when filtering removes every
/// candidate. Carries probability 0.0 and names no real class.
pub const NO_RESULT_LABEL: &str = "no result above threshold";

/// One ranked classification candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub prob: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, prob: f32) -> Self {
        Self {
            label: label.into(),
            prob,
        }
    }

    fn sentinel() -> Self {
        Self::new(NO_RESULT_LABEL, 0.0)
    }

    /// True when this is the sentinel rather than a real class.
    pub fn is_sentinel(&self) -> bool {
        self.label == NO_RESULT_LABEL && self.prob == 0.0
    }
}

/// Caller-supplied classification parameters, validated and clamped up
/// front rather than recovered from downstream failures.
#[derive(Clone, Debug)]
pub struct ClassifyOptions {
    /// Requested model id; `None` or an unregistered id selects the
    /// configured default.
    pub model_id: Option<String>,
    pub top_k: usize,
    pub min_probability: f32,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            model_id: None,
            top_k: MAX_TOP_K,
            min_probability: 0.0,
        }
    }
}

impl ClassifyOptions {
    /// Effective (top_k, min_probability) after clamping to [1, 5] and
    /// [0.0, 1.0].
    pub fn clamped(&self) -> (usize, f32) {
        (
            self.top_k.clamp(1, MAX_TOP_K),
            self.min_probability.clamp(0.0, 1.0),
        )
    }
}

/// A normalized classification outcome. `model_id` names the model that
/// actually ran, which differs from the requested id after a fallback.
#[derive(Clone, Debug, Serialize)]
pub struct Classification {
    pub model_id: String,
    pub predictions: Vec<Prediction>,
}

impl Classification {
    /// Highest-ranked entry. Results are never empty by construction.
    pub fn top1(&self) -> &Prediction {
        &self.predictions[0]
    }
}

/// The classification half of the inference core.
pub struct ClassificationPipeline {
    registry: Arc<ModelRegistry>,
    cache: BackendCache<dyn ClassifierBackend>,
    labels: Arc<LabelTable>,
}

impl ClassificationPipeline {
    pub fn new(registry: Arc<ModelRegistry>, labels: Arc<LabelTable>) -> Self {
        Self {
            registry,
            cache: BackendCache::new(),
            labels,
        }
    }

    /// Classify an image.
    ///
    /// Unknown model ids fall back to the registry default (logged, and
    /// visible in the returned `model_id`); decode produces `top_k`
    /// candidates, the confidence floor is applied afterwards, and an
    /// emptied list is replaced by the sentinel entry.
    pub fn classify(
        &self,
        image: &RgbImage,
        options: &ClassifyOptions,
    ) -> Result<Classification, VisionError> {
        let (top_k, min_probability) = options.clamped();

        let (descriptor, substituted) = match options.model_id.as_deref() {
            Some(requested) => self.registry.resolve(requested),
            None => (self.registry.describe(self.registry.default_id())?, false),
        };
        if substituted {
            log::warn!(
                "model '{}' is not registered; running default '{}'",
                options.model_id.as_deref().unwrap_or(""),
                descriptor.id
            );
        }

        let backend = self
            .cache
            .get_or_create(&descriptor.id, || (descriptor.loader)())?;

        let tensor = descriptor.prepare(image);
        let scores = backend.infer(&tensor)?;

        let mut predictions: Vec<Prediction> = descriptor
            .decode
            .rank(&scores, top_k, &self.labels)
            .into_iter()
            .map(|(label, prob)| Prediction::new(label, prob))
            .collect();

        predictions.retain(|p| p.prob >= min_probability);
        if predictions.is_empty() {
            predictions.push(Prediction::sentinel());
        }
        predictions.truncate(top_k);

        Ok(Classification {
            model_id: descriptor.id.clone(),
            predictions,
        })
    }

    /// Number of backends constructed so far.
    pub fn loaded_backends(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServeConfig;
    use crate::model::{builtin_registry, imagenet_labels};

    fn pipeline() -> ClassificationPipeline {
        let cfg = ServeConfig::default();
        let registry = Arc::new(builtin_registry(&cfg).unwrap());
        let labels = Arc::new(imagenet_labels(&cfg));
        ClassificationPipeline::new(registry, labels)
    }

    fn test_image() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| {
            image::Rgb([(x * 3) as u8, (y * 5) as u8, ((x + y) * 2) as u8])
        })
    }

    #[test]
    fn results_are_sorted_bounded_and_in_range() {
        let pipeline = pipeline();
        for model in ["mobilenet_v2", "efficientnet_v2_b0", "flowers_v1"] {
            let result = pipeline
                .classify(
                    &test_image(),
                    &ClassifyOptions {
                        model_id: Some(model.to_string()),
                        ..ClassifyOptions::default()
                    },
                )
                .unwrap();

            assert_eq!(result.model_id, model);
            assert!(!result.predictions.is_empty());
            assert!(result.predictions.len() <= MAX_TOP_K);
            assert!(result
                .predictions
                .windows(2)
                .all(|w| w[0].prob >= w[1].prob));
            assert!(result
                .predictions
                .iter()
                .all(|p| (0.0..=1.0).contains(&p.prob)));
        }
    }

    #[test]
    fn top_k_is_clamped_to_the_documented_range() {
        let pipeline = pipeline();
        let image = test_image();

        let huge = pipeline
            .classify(
                &image,
                &ClassifyOptions {
                    top_k: 5000,
                    ..ClassifyOptions::default()
                },
            )
            .unwrap();
        assert!(huge.predictions.len() <= MAX_TOP_K);

        let zero = pipeline
            .classify(
                &image,
                &ClassifyOptions {
                    top_k: 0,
                    ..ClassifyOptions::default()
                },
            )
            .unwrap();
        assert_eq!(zero.predictions.len(), 1);
    }

    #[test]
    fn unknown_model_substitutes_the_default_and_says_so() {
        let pipeline = pipeline();
        let result = pipeline
            .classify(
                &test_image(),
                &ClassifyOptions {
                    model_id: Some("resnet_152".to_string()),
                    ..ClassifyOptions::default()
                },
            )
            .unwrap();
        assert_eq!(result.model_id, "efficientnet_v2_b3");
    }

    #[test]
    fn impossible_floor_yields_exactly_the_sentinel() {
        let pipeline = pipeline();
        let result = pipeline
            .classify(
                &test_image(),
                &ClassifyOptions {
                    min_probability: 1.0,
                    ..ClassifyOptions::default()
                },
            )
            .unwrap();

        assert_eq!(result.predictions.len(), 1);
        let only = &result.predictions[0];
        assert!(only.is_sentinel());
        assert_eq!(only.label, NO_RESULT_LABEL);
        assert_eq!(only.prob, 0.0);
    }

    #[test]
    fn repeated_calls_reuse_one_backend() {
        let pipeline = pipeline();
        let image = test_image();
        let options = ClassifyOptions::default();

        let first = pipeline.classify(&image, &options).unwrap();
        let second = pipeline.classify(&image, &options).unwrap();

        assert_eq!(first.predictions, second.predictions);
        assert_eq!(pipeline.loaded_backends(), 1);
    }
}
