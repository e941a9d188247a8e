//! Shared detection state.
//!
//! The store is the only place the latest detection result lives. The capture
//! loop reads it once per tick, the analysis task replaces it once per pass.
//! Both operations hold the lock for the duration of a clone or a move and
//! nothing else, so the renderer never draws while holding it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::detect::DetectionResult;

/// Copy of the detection state handed to the renderer.
///
/// `violation_active` is derived from the result at construction and cannot be
/// set on its own.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSnapshot {
    result: DetectionResult,
    violation_active: bool,
}

impl DetectionSnapshot {
    pub fn from_result(result: DetectionResult) -> Self {
        let violation_active = !result.is_empty();
        Self {
            result,
            violation_active,
        }
    }

    pub fn result(&self) -> &DetectionResult {
        &self.result
    }

    pub fn violation_active(&self) -> bool {
        self.violation_active
    }
}

struct StoreInner {
    snapshot: DetectionSnapshot,
    closed: bool,
}

/// Thread-safe holder of the most recent completed detection result.
pub struct DetectionStateStore {
    inner: Mutex<StoreInner>,
}

impl DetectionStateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                snapshot: DetectionSnapshot::default(),
                closed: false,
            }),
        }
    }

    /// Atomically replace the latest result. Returns `false` once the store
    /// has been closed; the result is then dropped without effect.
    pub fn replace(&self, result: DetectionResult) -> bool {
        let next = DetectionSnapshot::from_result(result);
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.snapshot = next;
        true
    }

    pub fn snapshot(&self) -> DetectionSnapshot {
        self.lock().snapshot.clone()
    }

    /// Stop accepting writes. Reads keep returning the last state.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // Writes swap a whole snapshot, so a poisoned lock still guards a
    // consistent value.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DetectionStateStore {
    fn default() -> Self {
        Self::new()
    }
}
