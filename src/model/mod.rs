//! Model registry, backend traits and the process-wide backend cache.
//!
//! A `ModelDescriptor` bundles everything the pipelines need to run one
//! model: input size, preprocessing policy, decode policy and a lazy
//! loader. The registry holds descriptors, never instances; instances are
//! constructed at most once by `BackendCache` on first use.

mod backend;
pub mod backends;
mod cache;
mod descriptor;
mod labels;
mod registry;

pub use backend::{ClassifierBackend, DetectorBackend, RawDetections};
pub use cache::BackendCache;
pub use descriptor::{ClassifierLoader, Decode, InputTensor, ModelDescriptor, Preprocess};
pub use labels::LabelTable;
pub use registry::{
    builtin_detector, builtin_registry, imagenet_labels, DetectorLoader, ModelInfo, ModelRegistry,
};
