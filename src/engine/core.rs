// src/engine/core.rs

//! Pure orchestration state machine.
//!
//! `CoreOrchestrator` consumes execution records and answers "what runs
//! next". It owns every piece of mutable orchestration state (module
//! statuses, attempt counters, circuit breaker, rollback list) and has no
//! channels, processes or filesystem access. The async shell
//! (`engine::runtime::Orchestrator`) feeds it one event at a time, which is
//! what serializes transitions between concurrently finishing modules.
//!
//! Per-module lifecycle:
//!
//! ```text
//! Pending -> Running -> Succeeded -> (RolledBack, on abort)
//!                    -> Failed
//!                    -> Pending   (orchestrator-level retry)
//! Pending -> Skipped  (already satisfied / dependency failed / run aborted)
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dag::{ModuleGraph, ScheduledModule};
use crate::engine::report::RunReport;
use crate::engine::RunOutcome;
use crate::errors::{ProvisorError, Result};
use crate::events::{EventKind, EventSink};
use crate::exec::ExecutionRecord;
use crate::resilience::{CircuitBreaker, RollbackManager, RollbackOutcome, RollbackReport};
use crate::store::{CheckpointSnapshot, SNAPSHOT_VERSION};
use crate::types::{ErrorCategory, ModuleId, ModuleStatus, SkipReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    /// No new dispatches; waiting for in-flight modules.
    Draining(DrainReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainReason {
    Systemic(ErrorCategory),
    Interrupted,
}

#[derive(Debug)]
pub struct CoreOrchestrator {
    graph: ModuleGraph,
    statuses: BTreeMap<ModuleId, ModuleStatus>,
    attempts: BTreeMap<ModuleId, u32>,
    breaker: CircuitBreaker,
    rollback: RollbackManager,
    records: Vec<ExecutionRecord>,
    concurrency: usize,
    phase: Phase,
    events: EventSink,
}

impl CoreOrchestrator {
    /// Fresh run: every module starts `Pending`.
    pub fn new(
        graph: ModuleGraph,
        breaker: CircuitBreaker,
        concurrency: usize,
        events: EventSink,
    ) -> Self {
        let statuses = graph
            .topological_order()
            .iter()
            .map(|id| (id.clone(), ModuleStatus::Pending))
            .collect();

        Self {
            graph,
            statuses,
            attempts: BTreeMap::new(),
            breaker,
            rollback: RollbackManager::new(),
            records: Vec::new(),
            concurrency: concurrency.max(1),
            phase: Phase::Running,
            events,
        }
    }

    /// Resume from a checkpoint.
    ///
    /// Modules that had succeeded become `Skipped(AlreadySatisfied)` and are
    /// never dispatched again; everything else is re-attempted. Breaker
    /// counters and rollback entries carry over unless `reset_breaker` is set
    /// (which clears only the breaker).
    ///
    /// Refuses to resume while a restored systemic category is tripped.
    pub fn restore(&mut self, snapshot: CheckpointSnapshot, reset_breaker: bool) -> Result<()> {
        for id in snapshot.statuses.keys() {
            if !self.graph.contains(id) {
                warn!(module = %id, "checkpoint mentions a module that is no longer configured");
            }
        }

        for (id, status) in self.statuses.iter_mut() {
            let restored = snapshot.statuses.get(id);
            *status = match restored {
                Some(previous) if previous.satisfies_dependents() => {
                    ModuleStatus::Skipped(SkipReason::AlreadySatisfied)
                }
                _ => ModuleStatus::Pending,
            };
            debug!(module = %id, previous = ?restored, now = %status, "restored module status");
        }

        if reset_breaker {
            info!("ignoring circuit breaker state from checkpoint");
            self.breaker.reset();
        } else {
            self.breaker.restore(snapshot.breaker);
        }

        self.rollback.restore(snapshot.rollback);

        let skipped = self
            .statuses
            .values()
            .filter(|s| matches!(s, ModuleStatus::Skipped(SkipReason::AlreadySatisfied)))
            .count();
        info!(
            skipped,
            pending = self.statuses.len() - skipped,
            rollback_entries = self.rollback.entries().len(),
            "resuming from checkpoint"
        );

        for (id, status) in &self.statuses {
            if matches!(status, ModuleStatus::Skipped(_)) {
                self.events
                    .emit(id, EventKind::Status, status.to_string());
            }
        }

        match self.breaker.tripped_systemic() {
            Some(category) => Err(ProvisorError::BreakerTripped(category)),
            None => Ok(()),
        }
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn status_of(&self, id: &str) -> Option<&ModuleStatus> {
        self.statuses.get(id)
    }

    pub fn statuses(&self) -> &BTreeMap<ModuleId, ModuleStatus> {
        &self.statuses
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn rollback(&self) -> &RollbackManager {
        &self.rollback
    }

    pub fn rollback_mut(&mut self) -> &mut RollbackManager {
        &mut self.rollback
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn running_count(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| matches!(s, ModuleStatus::Running))
            .count()
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.phase, Phase::Draining(_))
    }

    /// Mark ready modules `Running` (up to the free worker slots) and return
    /// them for dispatch.
    ///
    /// Readiness is recomputed from current statuses on every call.
    pub fn dispatch_ready(&mut self) -> Vec<ScheduledModule> {
        self.skip_blocked();

        if self.is_draining() {
            return Vec::new();
        }

        let free = self.concurrency.saturating_sub(self.running_count());
        if free == 0 {
            return Vec::new();
        }

        let ready = self.graph.ready_set(&self.statuses);
        let mut scheduled = Vec::new();

        for id in ready.into_iter().take(free) {
            let Some(def) = self.graph.get(&id) else {
                continue;
            };
            let attempt = {
                let counter = self.attempts.entry(id.clone()).or_insert(0);
                *counter += 1;
                *counter
            };
            let module = ScheduledModule::from_def(def, attempt);

            info!(module = %id, attempt, "dispatching module");
            self.set_status(&id, ModuleStatus::Running);
            scheduled.push(module);
        }

        scheduled
    }

    /// Apply a finished execution: update status, breaker and rollback list.
    pub fn handle_completion(&mut self, record: ExecutionRecord) {
        let id = record.module.clone();

        match self.statuses.get(&id) {
            Some(ModuleStatus::Running) => {}
            other => {
                warn!(module = %id, status = ?other, "completion for a module that is not running; ignoring");
                return;
            }
        }

        let succeeded = record.succeeded();
        let failure_category = record.failure_category();
        let seen: Vec<ErrorCategory> = record
            .category
            .iter()
            .chain(record.category_hits.keys())
            .copied()
            .collect();
        self.records.push(record);

        if succeeded {
            for category in seen {
                self.breaker.record_result(category, true);
            }

            self.set_status(&id, ModuleStatus::Succeeded);

            if let Some(command) = self.graph.get(&id).and_then(|def| def.rollback.clone()) {
                self.rollback.record(&id, &command);
            }
            return;
        }

        if self.breaker.record_result(failure_category, false) {
            self.events.emit(
                &id,
                EventKind::Breaker,
                format!(
                    "breaker for '{failure_category}' tripped after {} consecutive failures",
                    self.breaker.consecutive_failures(failure_category)
                ),
            );
        }

        if self.phase == Phase::Running {
            if let Some(category) = self.breaker.tripped_systemic() {
                warn!(
                    module = %id,
                    %category,
                    in_flight = self.running_count().saturating_sub(1),
                    "systemic failure; halting dispatch and draining in-flight modules"
                );
                self.phase = Phase::Draining(DrainReason::Systemic(category));
            }
        }

        let attempts = self.attempts.get(&id).copied().unwrap_or(0);
        let retries = self.graph.get(&id).map(|def| def.retries).unwrap_or(0);

        if !self.is_draining() && attempts <= retries && !self.breaker.is_tripped(failure_category) {
            info!(
                module = %id,
                attempt = attempts,
                retries,
                category = %failure_category,
                "module failed; scheduling retry"
            );
            self.set_status(&id, ModuleStatus::Pending);
        } else {
            warn!(module = %id, category = %failure_category, "module failed");
            self.set_status(&id, ModuleStatus::Failed);
        }
    }

    /// Stop dispatching new modules; in-flight ones finish normally.
    pub fn request_shutdown(&mut self) {
        if self.phase == Phase::Running {
            info!("shutdown requested; waiting for in-flight modules");
            self.phase = Phase::Draining(DrainReason::Interrupted);
        }
    }

    /// Settle the run once nothing is in flight.
    pub fn finish(&mut self) -> RunOutcome {
        self.skip_blocked();

        match self.phase {
            Phase::Running => RunOutcome::Completed,
            Phase::Draining(DrainReason::Interrupted) => RunOutcome::Interrupted,
            Phase::Draining(DrainReason::Systemic(category)) => {
                let pending: Vec<ModuleId> = self
                    .statuses
                    .iter()
                    .filter(|(_, s)| matches!(s, ModuleStatus::Pending))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in pending {
                    self.set_status(&id, ModuleStatus::Skipped(SkipReason::RunAborted));
                }
                RunOutcome::Aborted { category }
            }
        }
    }

    /// Mark modules whose rollback succeeded as `RolledBack`.
    pub fn apply_rollback_report(&mut self, report: &RollbackReport) {
        for outcome in &report.outcomes {
            self.apply_rollback_outcome(outcome);
        }
    }

    /// Record one consumed rollback entry. A failed rollback leaves the
    /// module's status alone.
    pub fn apply_rollback_outcome(&mut self, outcome: &RollbackOutcome) {
        if !outcome.succeeded() {
            return;
        }
        let reverted = matches!(
            self.statuses.get(&outcome.module),
            Some(ModuleStatus::Succeeded)
                | Some(ModuleStatus::Skipped(SkipReason::AlreadySatisfied))
        );
        if reverted {
            self.set_status(&outcome.module, ModuleStatus::RolledBack);
        }
    }

    /// Whether every module is installed (this run or a previous one).
    pub fn fully_succeeded(&self) -> bool {
        self.statuses.values().all(ModuleStatus::satisfies_dependents)
    }

    /// Full snapshot of current progress.
    pub fn snapshot(&self) -> CheckpointSnapshot {
        CheckpointSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            statuses: self.statuses.clone(),
            breaker: self.breaker.state().clone(),
            rollback: self.rollback.entries().to_vec(),
        }
    }

    pub fn report(&self, outcome: RunOutcome, rollback: Option<RollbackReport>) -> RunReport {
        RunReport {
            outcome,
            statuses: self.statuses.clone(),
            records: self.records.clone(),
            tripped: self.breaker.tripped(),
            rollback,
        }
    }

    /// Skip `Pending` modules that can never become ready because a
    /// dependency ended without being installed.
    ///
    /// Walks in topological order so a whole failed branch is skipped in one
    /// pass; siblings of the failed module are unaffected.
    fn skip_blocked(&mut self) {
        let order = self.graph.topological_order().to_vec();

        for id in order {
            if !matches!(self.statuses.get(&id), Some(ModuleStatus::Pending)) {
                continue;
            }

            let blocker = self.graph.dependencies_of(&id).iter().find_map(|dep| {
                match self.statuses.get(dep) {
                    Some(ModuleStatus::Skipped(SkipReason::DependencyFailed(root))) => {
                        Some(root.clone())
                    }
                    Some(status) if status.is_terminal() && !status.satisfies_dependents() => {
                        Some(dep.clone())
                    }
                    _ => None,
                }
            });

            if let Some(root) = blocker {
                debug!(module = %id, failed = %root, "skipping module blocked by failed dependency");
                self.set_status(&id, ModuleStatus::Skipped(SkipReason::DependencyFailed(root)));
            }
        }
    }

    fn set_status(&mut self, id: &str, status: ModuleStatus) {
        self.events.emit(id, EventKind::Status, status.to_string());
        if let Some(slot) = self.statuses.get_mut(id) {
            *slot = status;
        }
    }
}
