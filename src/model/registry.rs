use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::config::ServeConfig;
use crate::error::VisionError;
use crate::model::backend::DetectorBackend;
use crate::model::backends;
use crate::model::descriptor::{ClassifierLoader, Decode, ModelDescriptor, Preprocess};
use crate::model::labels::LabelTable;

/// Zero-arg lazy constructor for the detector backend.
pub type DetectorLoader =
    Box<dyn Fn() -> Result<Arc<dyn DetectorBackend>, VisionError> + Send + Sync>;

/// Static display metadata for one model, never mutated at runtime.
#[derive(Clone, Debug, Serialize)]
pub struct ModelInfo {
    pub display: String,
    pub input: String,
    pub params: String,
    pub imagenet_top1: String,
    pub notes: String,
}

/// Registry of model descriptors, keyed by id.
///
/// Registration happens once at process start; the registry is immutable
/// afterwards. It holds descriptors only, never backend instances.
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
    info: BTreeMap<String, ModelInfo>,
    default_id: String,
}

impl ModelRegistry {
    fn new(default_id: &str) -> Self {
        Self {
            models: HashMap::new(),
            info: BTreeMap::new(),
            default_id: default_id.to_string(),
        }
    }

    fn register(
        &mut self,
        descriptor: ModelDescriptor,
        info: ModelInfo,
    ) -> Result<(), VisionError> {
        if self.models.contains_key(&descriptor.id) {
            return Err(VisionError::validation(
                "model id",
                format!("'{}' registered twice", descriptor.id),
            ));
        }
        self.info.insert(descriptor.id.clone(), info);
        self.models.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    /// All registered model ids, sorted.
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Descriptor for `id`, failing on absent ids. Callers handling user
    /// input should use `resolve` instead.
    pub fn describe(&self, id: &str) -> Result<&ModelDescriptor, VisionError> {
        self.models
            .get(id)
            .ok_or_else(|| VisionError::UnknownModel(id.to_string()))
    }

    /// Descriptor for `id`, substituting the configured default when the
    /// id is not registered. The flag reports whether a substitution
    /// happened so the response can name the model that actually ran.
    pub fn resolve(&self, id: &str) -> (&ModelDescriptor, bool) {
        match self.models.get(id) {
            Some(descriptor) => (descriptor, false),
            None => {
                let fallback = self
                    .models
                    .get(&self.default_id)
                    .expect("default model is always registered");
                (fallback, true)
            }
        }
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    /// Static per-model display metadata.
    pub fn info(&self) -> &BTreeMap<String, ModelInfo> {
        &self.info
    }
}

fn info(display: &str, input: &str, params: &str, top1: &str, notes: &str) -> ModelInfo {
    ModelInfo {
        display: display.to_string(),
        input: input.to_string(),
        params: params.to_string(),
        imagenet_top1: top1.to_string(),
        notes: notes.to_string(),
    }
}

fn classifier_loader(
    weights: &str,
    id: &str,
    input_shape: (u32, u32),
    classes: usize,
) -> ClassifierLoader {
    let weights = weights.to_string();
    let id = id.to_string();
    Box::new(move || backends::load_classifier(&weights, &id, input_shape, classes))
}

/// Build the registry of served models from configuration.
///
/// The registered set: three ImageNet classifiers plus the hosted flower
/// demo model, whose raw output space carries a leading background score
/// and therefore decodes through `Decode::ImagenetShifted`.
pub fn builtin_registry(cfg: &ServeConfig) -> Result<ModelRegistry, VisionError> {
    let mut registry = ModelRegistry::new(&cfg.default_model);

    registry.register(
        ModelDescriptor {
            id: "mobilenet_v2".to_string(),
            display_name: "MobileNetV2".to_string(),
            input_shape: (224, 224),
            preprocess: Preprocess::MinusOneToOne,
            decode: Decode::Imagenet,
            loader: classifier_loader(&cfg.weights, "mobilenet_v2", (224, 224), 1000),
        },
        info(
            "MobileNetV2",
            "224×224",
            "~3.5M",
            "~71.8%",
            "Light and fast; suits constrained devices or high request rates.",
        ),
    )?;

    registry.register(
        ModelDescriptor {
            id: "efficientnet_v2_b0".to_string(),
            display_name: "EfficientNetV2-B0".to_string(),
            input_shape: (224, 224),
            // EfficientNetV2 rescales inside the graph; input stays 0..255.
            preprocess: Preprocess::Identity,
            decode: Decode::Imagenet,
            loader: classifier_loader(&cfg.weights, "efficientnet_v2_b0", (224, 224), 1000),
        },
        info(
            "EfficientNetV2-B0",
            "224×224",
            "~7.1M",
            "~78.7%",
            "Good balance of speed and accuracy.",
        ),
    )?;

    registry.register(
        ModelDescriptor {
            id: "efficientnet_v2_b3".to_string(),
            display_name: "EfficientNetV2-B3".to_string(),
            input_shape: (300, 300),
            preprocess: Preprocess::Identity,
            decode: Decode::Imagenet,
            loader: classifier_loader(&cfg.weights, "efficientnet_v2_b3", (300, 300), 1000),
        },
        info(
            "EfficientNetV2-B3",
            "300×300",
            "~14.4M",
            "~82-83%",
            "Higher accuracy; heavier than B0 or MobileNetV2.",
        ),
    )?;

    // The flower demo advertises five classes (daisy, dandelion, roses,
    // sunflowers, tulips) but the hosted model emits ImageNet-plus-
    // background scores, so it decodes through the shifted policy.
    registry.register(
        ModelDescriptor {
            id: "flowers_v1".to_string(),
            display_name: "Flowers (hosted)".to_string(),
            input_shape: (224, 224),
            preprocess: Preprocess::ZeroToOne,
            decode: Decode::ImagenetShifted,
            loader: backends::hosted_classifier_loader(&cfg.weights, "flowers_v1", (224, 224)),
        },
        info(
            "Flowers (hosted)",
            "224×224",
            "~3.5M",
            "N/A",
            "Five common flower classes; demo served by a hosted MobileNet.",
        ),
    )?;

    if !registry.contains(&cfg.default_model) {
        return Err(VisionError::validation(
            "default_model",
            format!("'{}' is not a registered model", cfg.default_model),
        ));
    }

    Ok(registry)
}

/// Id and lazy loader for the detection backend.
pub fn builtin_detector(cfg: &ServeConfig) -> (String, DetectorLoader) {
    let id = "ssd_mobilenet_v2".to_string();
    let weights = cfg.weights.clone();
    let loader_id = id.clone();
    let loader: DetectorLoader = Box::new(move || backends::load_detector(&weights, &loader_id));
    (id, loader)
}

/// Classification label table for the configured weights source.
///
/// File-backed weights may ship `imagenet_labels.txt` (one label per
/// line); without it, decode degrades to formatted class ids.
pub fn imagenet_labels(cfg: &ServeConfig) -> LabelTable {
    if cfg.uses_stub_backends() {
        return LabelTable::empty();
    }
    let path = cfg.weights_dir().join("imagenet_labels.txt");
    if !path.exists() {
        return LabelTable::empty();
    }
    match LabelTable::from_lines_file(&path) {
        Ok(table) => table,
        Err(err) => {
            log::warn!("failed to load {}: {}", path.display(), err);
            LabelTable::empty()
        }
    }
}
