// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The orchestrator talks to an `ExecutorBackend` instead of spawning work
//! itself. Completions always come back as `RuntimeEvent::ModuleCompleted`
//! on the orchestrator's event channel, so the orchestrator stays the only
//! place where module status changes.
//!
//! - `MonitorBackend` is the production implementation: one Tokio task per
//!   module, each running the [`ExecutionMonitor`].
//! - Tests can provide their own backend that reports predetermined records.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::dag::ScheduledModule;
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::monitor::{ExecutionMonitor, ExecutionRecord};

/// Trait abstracting how dispatched modules are executed.
pub trait ExecutorBackend: Send {
    /// Start executing the given modules.
    ///
    /// Must return promptly: completion is reported asynchronously through
    /// the orchestrator's event channel, exactly once per module.
    fn spawn_ready_modules(
        &mut self,
        modules: Vec<ScheduledModule>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production backend: every module runs under the execution monitor in
/// its own Tokio task.
pub struct MonitorBackend {
    monitor: Arc<ExecutionMonitor>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl MonitorBackend {
    pub fn new(monitor: Arc<ExecutionMonitor>, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            monitor,
            runtime_tx,
        }
    }
}

impl ExecutorBackend for MonitorBackend {
    fn spawn_ready_modules(
        &mut self,
        modules: Vec<ScheduledModule>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        for module in modules {
            let monitor = Arc::clone(&self.monitor);
            let tx = self.runtime_tx.clone();

            tokio::spawn(async move {
                let started_at = Utc::now();
                let worker_module = module.clone();
                let worker = tokio::spawn(async move { monitor.run(&worker_module).await });

                let record = match worker.await {
                    Ok(record) => record,
                    Err(e) => {
                        error!(module = %module.id, error = %e, "module worker crashed");
                        ExecutionRecord::crashed(&module, started_at)
                    }
                };

                if tx.send(RuntimeEvent::ModuleCompleted(record)).await.is_err() {
                    debug!(module = %module.id, "orchestrator gone; dropping completion");
                }
            });
        }

        Box::pin(async { Ok(()) })
    }
}
