#![allow(dead_code)]

use std::future::pending;
use std::sync::{Arc, Mutex};

use provisor::config::ConfigFile;
use provisor::engine::RunReport;
use provisor::errors::{ProvisorError, Result};
use provisor::events::EventSink;
use provisor::store::{CheckpointSnapshot, MemoryStateStore, StateStore};
use provisor::{RunSettings, orchestrate};
use provisor_test_utils::scripted_transport::ScriptedTransport;

pub use provisor_test_utils::{init_tracing, with_timeout};

pub fn settings(concurrency: usize) -> RunSettings {
    RunSettings {
        concurrency,
        fresh: false,
        reset_breaker: false,
    }
}

/// Run the full orchestration (monitor backend included) over a scripted
/// transport, checkpointing into `store`.
pub async fn run_scripted(
    cfg: &ConfigFile,
    transport: &ScriptedTransport,
    store: &MemoryStateStore,
    settings: RunSettings,
) -> Result<RunReport> {
    orchestrate(
        cfg,
        Arc::new(transport.clone()),
        Box::new(store.clone()),
        EventSink::disabled(),
        settings,
        pending::<()>(),
    )
    .await
}

/// A store that accepts `allowed_saves` writes and then fails every one.
#[derive(Debug)]
pub struct FailingStore {
    pub allowed_saves: usize,
}

impl StateStore for FailingStore {
    fn load(&self) -> Result<Option<CheckpointSnapshot>> {
        Ok(None)
    }

    fn save(&mut self, _snapshot: &CheckpointSnapshot) -> Result<()> {
        if self.allowed_saves == 0 {
            return Err(ProvisorError::Persistence("disk full".to_string()));
        }
        self.allowed_saves -= 1;
        Ok(())
    }
}

/// A store that keeps every snapshot it was asked to save, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    saves: Arc<Mutex<Vec<CheckpointSnapshot>>>,
}

impl RecordingStore {
    pub fn saves(&self) -> Vec<CheckpointSnapshot> {
        self.saves.lock().unwrap().clone()
    }
}

impl StateStore for RecordingStore {
    fn load(&self) -> Result<Option<CheckpointSnapshot>> {
        Ok(self.saves.lock().unwrap().last().cloned())
    }

    fn save(&mut self, snapshot: &CheckpointSnapshot) -> Result<()> {
        self.saves.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}
