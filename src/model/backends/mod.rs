//! Backend realizations behind the classifier/detector traits.
//!
//! `stub` is always available and selected by the `stub://` weights
//! source; file-backed ONNX inference lives behind `backend-tract`, and
//! fetching hosted model artifacts behind `hosted-models`.

pub mod stub;

#[cfg(feature = "hosted-models")]
pub mod hosted;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubClassifier, StubDetector};

#[cfg(feature = "backend-tract")]
pub use tract::{TractClassifier, TractDetector};

use std::sync::Arc;

use crate::error::VisionError;
use crate::model::backend::{ClassifierBackend, DetectorBackend};
use crate::model::descriptor::ClassifierLoader;

const STUB_SCHEME: &str = "stub://";

/// Construct a classification backend for the configured weights source.
pub(crate) fn load_classifier(
    weights: &str,
    id: &str,
    input_shape: (u32, u32),
    classes: usize,
) -> Result<Arc<dyn ClassifierBackend>, VisionError> {
    if weights.starts_with(STUB_SCHEME) {
        return Ok(Arc::new(StubClassifier::new(id, classes)));
    }

    #[cfg(feature = "backend-tract")]
    {
        let path = std::path::Path::new(weights).join(format!("{}.onnx", id));
        let backend = tract::TractClassifier::load(&path, id, input_shape)?;
        Ok(Arc::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let _ = input_shape;
        Err(VisionError::backend_load(
            id,
            "file-backed weights require the backend-tract feature",
        ))
    }
}

/// Construct the detection backend for the configured weights source.
pub(crate) fn load_detector(
    weights: &str,
    id: &str,
) -> Result<Arc<dyn DetectorBackend>, VisionError> {
    if weights.starts_with(STUB_SCHEME) {
        return Ok(Arc::new(StubDetector::new(id)));
    }

    #[cfg(feature = "backend-tract")]
    {
        let path = std::path::Path::new(weights).join(format!("{}.onnx", id));
        let backend = tract::TractDetector::load(&path, id)?;
        Ok(Arc::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(VisionError::backend_load(
            id,
            "file-backed weights require the backend-tract feature",
        ))
    }
}

/// Loader for the hosted flower classifier: its artifact is fetched over
/// HTTP into the weights directory on first load, then served like any
/// other file-backed model. The stub source bypasses the fetch.
pub(crate) fn hosted_classifier_loader(
    weights: &str,
    id: &str,
    input_shape: (u32, u32),
) -> ClassifierLoader {
    let weights = weights.to_string();
    let id = id.to_string();
    Box::new(move || {
        if weights.starts_with(STUB_SCHEME) {
            // Hosted-hub exports carry a leading background score.
            return Ok(Arc::new(StubClassifier::new(&id, 1001)));
        }

        #[cfg(feature = "hosted-models")]
        {
            let path = hosted::ensure_fetched(&weights, &id)?;
            let backend = tract::TractClassifier::load(&path, &id, input_shape)?;
            Ok(Arc::new(backend) as Arc<dyn ClassifierBackend>)
        }
        #[cfg(all(feature = "backend-tract", not(feature = "hosted-models")))]
        {
            // No fetch stack compiled in; a pre-placed local export works.
            let path = std::path::Path::new(&weights).join(format!("{}.onnx", id));
            let backend = tract::TractClassifier::load(&path, &id, input_shape)?;
            Ok(Arc::new(backend) as Arc<dyn ClassifierBackend>)
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            let _ = input_shape;
            Err(VisionError::backend_load(
                &id,
                "hosted models require the hosted-models feature",
            ))
        }
    })
}
