//! Best-effort record of the request currently on the wire, for status displays.
//!
//! The engine reports per-call state to its observer; this tracker is only a
//! "last writer wins" mirror. Concurrent calls overwrite each other, so nothing
//! should depend on it for correctness.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RequestState {
    pub backend: String,
    pub model_id: String,
    pub endpoint: String,
}

impl RequestState {
    pub fn new(backend: &str, model_id: &str, endpoint: &str) -> Self {
        Self {
            backend: backend.to_string(),
            model_id: model_id.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty() && self.model_id.is_empty() && self.endpoint.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RequestStateTracker {
    state: RwLock<RequestState>,
}

impl RequestStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&self, state: RequestState) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        *guard = state;
    }

    /// The tracked request, or `None` when nothing is in flight.
    pub fn current(&self) -> Option<RequestState> {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        (!guard.is_empty()).then(|| guard.clone())
    }

    pub fn clear(&self) {
        self.set_current(RequestState::default());
    }
}

static GLOBAL: Lazy<Arc<RequestStateTracker>> = Lazy::new(|| Arc::new(RequestStateTracker::new()));

/// Process-wide tracker shared by every engine that mirrors its state globally.
pub fn global() -> Arc<RequestStateTracker> {
    GLOBAL.clone()
}
