// src/store/mod.rs

//! Durable checkpoints.
//!
//! A [`CheckpointSnapshot`] is always a full overwrite of the previous one,
//! never an append, so saving after every status transition does not grow
//! the record.
//!
//! - [`file`] writes snapshots atomically (temp file + rename).
//! - [`memory`] keeps the last snapshot in memory only.

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::resilience::{CircuitBreakerState, RollbackEntry};
use crate::types::{CheckpointMode, ModuleId, ModuleStatus};

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

/// Current on-disk snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full serialization of orchestration progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub statuses: BTreeMap<ModuleId, ModuleStatus>,
    pub breaker: CircuitBreakerState,
    /// Active rollback entries, oldest first.
    pub rollback: Vec<RollbackEntry>,
}

/// Abstract storage for checkpoints.
///
/// Pure persistence: implementations never interpret or modify snapshots.
pub trait StateStore: Send + Debug {
    /// Last successfully saved snapshot, or `None` on first run.
    fn load(&self) -> Result<Option<CheckpointSnapshot>>;

    /// Replace the stored snapshot. Readers observe either the previous
    /// snapshot or this one, never a mix.
    fn save(&mut self, snapshot: &CheckpointSnapshot) -> Result<()>;
}

/// Build the store selected by `[config].checkpoint_mode`.
pub fn build_store(mode: CheckpointMode, path: PathBuf) -> Box<dyn StateStore> {
    match mode {
        CheckpointMode::File => Box::new(FileStateStore::new(path)),
        CheckpointMode::Memory => Box::new(MemoryStateStore::new()),
    }
}
