use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::VisionError;

/// Process-wide cache of instantiated backends, one slot per model id.
///
/// The mutex is held across construction, so concurrent calls for the same
/// id observe exactly one load; the trade-off is that loads for different
/// ids serialize behind the single lock, which is acceptable for a small
/// bounded model set. A failed load inserts nothing, leaving the slot free
/// for a later retry. Backends are never evicted.
pub struct BackendCache<B: ?Sized> {
    slots: Mutex<HashMap<String, Arc<B>>>,
}

impl<B: ?Sized> BackendCache<B> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached backend for `id`, constructing it with `load` on
    /// first use.
    pub fn get_or_create<F>(&self, id: &str, load: F) -> Result<Arc<B>, VisionError>
    where
        F: FnOnce() -> Result<Arc<B>, VisionError>,
    {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| VisionError::Inference("backend cache lock poisoned".to_string()))?;

        if let Some(backend) = slots.get(id) {
            return Ok(backend.clone());
        }

        log::info!("loading backend '{}'", id);
        let backend = load()?;
        slots.insert(id.to_string(), backend.clone());
        Ok(backend)
    }

    /// Number of constructed backends.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: ?Sized> Default for BackendCache<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Probe: Send + Sync {
        fn tag(&self) -> usize;
    }

    struct ProbeBackend(usize);

    impl Probe for ProbeBackend {
        fn tag(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn constructs_each_id_at_most_once_under_contention() {
        let cache = Arc::new(BackendCache::<dyn Probe>::new());
        let constructions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let constructions = constructions.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_create("shared", || {
                            let n = constructions.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::new(ProbeBackend(n)) as Arc<dyn Probe>)
                        })
                        .unwrap()
                })
            })
            .collect();

        let backends: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        for backend in &backends[1..] {
            assert!(Arc::ptr_eq(&backends[0], backend));
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_load_does_not_poison_the_slot() {
        let cache = BackendCache::<dyn Probe>::new();

        let err = match cache.get_or_create("flaky", || {
            Err(VisionError::backend_load("flaky", "weights missing"))
        }) {
            Ok(_) => panic!("expected load to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, VisionError::BackendLoad { .. }));
        assert!(cache.is_empty());

        // Retry succeeds and populates the slot.
        let backend = cache
            .get_or_create("flaky", || Ok(Arc::new(ProbeBackend(7)) as Arc<dyn Probe>))
            .unwrap();
        assert_eq!(backend.tag(), 7);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_ids_get_distinct_instances() {
        let cache = BackendCache::<dyn Probe>::new();
        let a = cache
            .get_or_create("a", || Ok(Arc::new(ProbeBackend(1)) as Arc<dyn Probe>))
            .unwrap();
        let b = cache
            .get_or_create("b", || Ok(Arc::new(ProbeBackend(2)) as Arc<dyn Probe>))
            .unwrap();
        assert_eq!(a.tag(), 1);
        assert_eq!(b.tag(), 2);
        assert_eq!(cache.len(), 2);
    }
}
