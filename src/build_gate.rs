//! Process-wide non-blocking build mutex.
//!
//! At most one pipeline build may run at a time; a concurrent request is
//! refused immediately with `CoreError::BuildBusy` rather than queued,
//! since overlapping builds would thrash every table's invariants for a
//! given `(taxon, slot, year)` triple.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::CoreError;

#[derive(Clone, Default)]
pub struct BuildGate {
    busy: Arc<AtomicBool>,
}

pub struct BuildGuard {
    busy: Arc<AtomicBool>,
}

impl BuildGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the gate or fails immediately; never blocks.
    pub fn try_acquire(&self) -> Result<BuildGuard, CoreError> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(CoreError::BuildBusy);
        }
        Ok(BuildGuard { busy: Arc::clone(&self.busy) })
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_while_first_is_held() {
        let gate = BuildGate::new();
        let guard = gate.try_acquire().expect("first acquire succeeds");
        assert!(matches!(gate.try_acquire(), Err(CoreError::BuildBusy)));
        drop(guard);
        assert!(gate.try_acquire().is_ok());
    }
}
