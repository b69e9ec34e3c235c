//! Lazily loaded, process-wide model handles.

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{Result, VerifyError};

type Loader<M> = Box<dyn Fn() -> anyhow::Result<M> + Send + Sync>;

/// A model slot that is filled on first use and shared read-only afterwards.
///
/// A failed load leaves the slot empty, so the next request retries instead of
/// observing a poisoned singleton.
pub struct LazyModel<M: Clone> {
    name: String,
    loader: Loader<M>,
    slot: RwLock<Option<M>>,
}

impl<M: Clone> LazyModel<M> {
    pub fn new(name: impl Into<String>, loader: impl Fn() -> anyhow::Result<M> + Send + Sync + 'static) -> Self {
        Self { name: name.into(), loader: Box::new(loader), slot: RwLock::new(None) }
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Load the model unless it is already loaded, and hand out a shared handle.
    pub fn ensure_loaded(&self) -> Result<M> {
        if let Some(model) = self.slot.read().as_ref() {
            return Ok(model.clone());
        }

        let mut slot = self.slot.write();
        // another caller may have loaded it while we waited for the lock
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }

        info!(model = %self.name, "loading model");
        match (self.loader)() {
            Ok(model) => {
                *slot = Some(model.clone());
                Ok(model)
            }
            Err(e) => {
                warn!(model = %self.name, error = %e, "model load failed");
                Err(VerifyError::ModelUnavailable { model: self.name.clone(), reason: format!("{e:#}") })
            }
        }
    }

    pub fn unload(&self) {
        if self.slot.write().take().is_some() {
            info!(model = %self.name, "model unloaded");
        }
    }
}
