//! Model acquisition with single-flight loading.
//!
//! The registry owns the only copy of the loaded classifier. The first
//! caller of [`ModelRegistry::ensure_loaded`] starts a fetch; callers that
//! arrive while it is running await the same fetch and receive the same
//! outcome. A successful load is cached until [`ModelRegistry::invalidate`];
//! a failed load leaves the cache empty so the next call tries again.

use crate::error::ModelLoadError;
use crate::models::inference::ModelHandle;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Produces a ready-to-run classifier (download, disk, test stub, ...)
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn fetch(&self) -> Result<ModelHandle, ModelLoadError>;
}

type LoadFuture = Shared<BoxFuture<'static, Result<ModelHandle, ModelLoadError>>>;

enum Slot {
    Empty,
    Loading { attempt: u64, load: LoadFuture },
    Ready(ModelHandle),
}

/// Process-wide owner of the classifier handle
pub struct ModelRegistry {
    source: Arc<dyn ModelSource>,
    slot: Mutex<Slot>,
    /// Underlying fetches started so far
    fetches: AtomicU64,
}

impl ModelRegistry {
    pub fn new(source: Arc<dyn ModelSource>) -> Self {
        Self {
            source,
            slot: Mutex::new(Slot::Empty),
            fetches: AtomicU64::new(0),
        }
    }

    /// Return the cached model, loading it first if needed.
    pub async fn ensure_loaded(&self) -> Result<ModelHandle, ModelLoadError> {
        let (attempt, load) = {
            let mut slot = self.lock_slot();
            match &*slot {
                Slot::Ready(handle) => return Ok(handle.clone()),
                Slot::Loading { attempt, load } => {
                    debug!(attempt = *attempt, "Joining in-flight model load");
                    (*attempt, load.clone())
                }
                Slot::Empty => {
                    let attempt = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
                    let source = self.source.clone();
                    let load = async move { source.fetch().await }.boxed().shared();
                    info!(attempt, "Starting model load");
                    *slot = Slot::Loading {
                        attempt,
                        load: load.clone(),
                    };
                    (attempt, load)
                }
            }
        };

        let result = load.await;
        self.settle(attempt, &result);
        result
    }

    /// Cached model, if a load has already succeeded. Never starts a fetch.
    pub fn cached(&self) -> Option<ModelHandle> {
        match &*self.lock_slot() {
            Slot::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cached().is_some()
    }

    /// Drop the cached model so the next call fetches it again.
    pub fn invalidate(&self) {
        let mut slot = self.lock_slot();
        if matches!(*slot, Slot::Ready(_)) {
            info!("Model cache invalidated");
            *slot = Slot::Empty;
        }
    }

    /// Number of underlying fetches started
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Publish the outcome of `attempt`, unless a newer attempt owns the slot.
    fn settle(&self, attempt: u64, result: &Result<ModelHandle, ModelLoadError>) {
        let mut slot = self.lock_slot();
        let owns_slot = matches!(&*slot, Slot::Loading { attempt: a, .. } if *a == attempt);
        if !owns_slot {
            return;
        }

        match result {
            Ok(handle) => {
                info!(attempt, model = %handle.name(), "Model cached");
                *slot = Slot::Ready(handle.clone());
            }
            Err(e) => {
                warn!(attempt, error = %e, "Model load failed");
                *slot = Slot::Empty;
            }
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        // The slot holds no invariant a panicking holder could break halfway
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
