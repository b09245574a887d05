//! Task-scoped current-position cell
//!
//! The orchestrator publishes the coordinate of the action it is executing;
//! the crash detector reads it at detection time to correlate a crash with
//! an action. `None` means no action is in flight (between cases, or during
//! the forced stop and relaunch).

use std::sync::{Arc, Mutex};

use flowfuzz_core::Coordinate;

/// Shared `Option<Coordinate>` handed to both run loops by `Arc`
#[derive(Debug, Clone, Default)]
pub struct CurrentPosition {
    inner: Arc<Mutex<Option<Coordinate>>>,
}

impl CurrentPosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, coordinate: Coordinate) {
        self.set(Some(coordinate));
    }

    pub fn clear(&self) {
        self.set(None);
    }

    pub fn get(&self) -> Option<Coordinate> {
        // A poisoned cell still holds a valid Copy value
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, value: Option<Coordinate>) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }
}
