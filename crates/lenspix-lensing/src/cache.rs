//! Lazily built anti-lensing matrix.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::Result;
use crate::matrix::LensingMatrix;

/// Single-initialization slot for the anti-lensing matrix.
///
/// The lock is held for the whole build, so concurrent first callers wait for
/// one build and then share its result. A failed build leaves the slot empty.
#[derive(Debug, Default)]
pub struct AntiLensingCache {
    slot: Mutex<Option<Arc<LensingMatrix>>>,
    builds: AtomicUsize,
}

impl AntiLensingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-filled with an existing matrix.
    pub fn with_matrix(matrix: Arc<LensingMatrix>) -> Self {
        Self {
            slot: Mutex::new(Some(matrix)),
            builds: AtomicUsize::new(0),
        }
    }

    /// The cached matrix, if one has been built.
    pub fn get(&self) -> Option<Arc<LensingMatrix>> {
        self.slot.lock().clone()
    }

    /// The cached matrix, building it with `build` on first use.
    pub fn get_or_try_build<F>(&self, build: F) -> Result<Arc<LensingMatrix>>
    where
        F: FnOnce() -> Result<LensingMatrix>,
    {
        let mut slot = self.slot.lock();
        if let Some(matrix) = slot.as_ref() {
            return Ok(Arc::clone(matrix));
        }
        let matrix = Arc::new(build()?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        *slot = Some(Arc::clone(&matrix));
        Ok(matrix)
    }

    /// Number of builds performed by this cache.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}
