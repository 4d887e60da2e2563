// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{ProvisorError, Result};
use crate::events::EventSink;
use crate::exec::{CommandTransport, ExecutorBackend};
use crate::resilience::RollbackReport;
use crate::store::StateStore;

use super::core::CoreOrchestrator;
use super::report::RunReport;
use super::{RunOutcome, RuntimeEvent};

/// Drives the orchestration core in response to `RuntimeEvent`s, delegates
/// module execution to an `ExecutorBackend` and persists a checkpoint after
/// every state transition.
///
/// This is the IO shell around `CoreOrchestrator`, which holds all the
/// semantics. Any checkpoint write failure ends the run with an error:
/// continuing without durable progress could re-run completed modules on
/// the next resume.
pub struct Orchestrator<E: ExecutorBackend> {
    core: CoreOrchestrator,
    store: Box<dyn StateStore>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    transport: Arc<dyn CommandTransport>,
    events: EventSink,
}

impl<E: ExecutorBackend> fmt::Debug for Orchestrator<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("core", &self.core)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Orchestrator<E> {
    pub fn new(
        core: CoreOrchestrator,
        store: Box<dyn StateStore>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        transport: Arc<dyn CommandTransport>,
        events: EventSink,
    ) -> Self {
        Self {
            core,
            store,
            event_rx,
            executor,
            transport,
            events,
        }
    }

    /// Main event loop.
    ///
    /// - Dispatches every ready module up to the concurrency limit.
    /// - Applies completions one at a time.
    /// - Once nothing is in flight, settles the run and returns the report.
    ///   On a systemic abort the rollback list is replayed one entry at a
    ///   time, checkpointing after each.
    pub async fn run(mut self) -> Result<RunReport> {
        info!(modules = self.core.graph().len(), "orchestrator started");
        self.persist()?;

        loop {
            let ready = self.core.dispatch_ready();
            if !ready.is_empty() {
                self.persist()?;
                let ids: Vec<_> = ready.iter().map(|m| m.id.as_str()).collect();
                debug!(?ids, "spawning ready modules");
                self.executor.spawn_ready_modules(ready).await?;
            }

            let in_flight = self.core.running_count();
            if in_flight == 0 {
                break;
            }

            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    return Err(ProvisorError::Other(anyhow::anyhow!(
                        "runtime event channel closed with {in_flight} module(s) in flight"
                    )));
                }
            };

            match event {
                RuntimeEvent::ModuleCompleted(record) => {
                    debug!(
                        module = %record.module,
                        attempt = record.attempt,
                        exit = %record.exit,
                        "module completed"
                    );
                    self.core.handle_completion(record);
                    self.persist()?;
                }
                RuntimeEvent::ShutdownRequested => {
                    self.core.request_shutdown();
                    self.persist()?;
                }
            }
        }

        let outcome = self.core.finish();
        self.persist()?;

        let rollback = match outcome {
            RunOutcome::Aborted { category } => {
                warn!(
                    %category,
                    entries = self.core.rollback().entries().len(),
                    "run aborted; rolling back completed modules"
                );
                let mut report = RollbackReport::default();
                while let Some(outcome) = self
                    .core
                    .rollback_mut()
                    .rollback_next(self.transport.as_ref(), &self.events)
                    .await
                {
                    self.core.apply_rollback_outcome(&outcome);
                    self.persist()?;
                    report.outcomes.push(outcome);
                }
                Some(report)
            }
            RunOutcome::Completed if self.core.fully_succeeded() => {
                if !self.core.rollback().is_empty() {
                    debug!("all modules installed; clearing rollback list");
                    self.core.rollback_mut().clear();
                    self.persist()?;
                }
                None
            }
            RunOutcome::Completed | RunOutcome::Interrupted => None,
        };

        let report = self.core.report(outcome, rollback);
        info!(outcome = ?report.outcome, exit_code = report.exit_code(), "orchestrator finished");
        Ok(report)
    }

    fn persist(&mut self) -> Result<()> {
        let snapshot = self.core.snapshot();
        self.store.save(&snapshot)
    }
}
