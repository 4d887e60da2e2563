// src/store/memory.rs

use std::sync::{Arc, Mutex};

use crate::errors::{ProvisorError, Result};
use crate::store::{CheckpointSnapshot, StateStore};

/// Keeps the last snapshot in memory (lost on restart).
///
/// Clones share the same slot, so a caller can keep a handle and inspect
/// what the orchestrator saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    slot: Arc<Mutex<Option<CheckpointSnapshot>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. to resume from a known snapshot.
    pub fn with_snapshot(snapshot: CheckpointSnapshot) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(snapshot))),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<CheckpointSnapshot>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| ProvisorError::Persistence("memory store lock poisoned".to_string()))?;
        Ok(slot.clone())
    }

    fn save(&mut self, snapshot: &CheckpointSnapshot) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ProvisorError::Persistence("memory store lock poisoned".to_string()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }
}
