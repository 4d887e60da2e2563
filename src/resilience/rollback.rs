// src/resilience/rollback.rs

//! Rollback manager: recorded undo actions, replayed newest-first.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::{EventKind, EventSink};
use crate::exec::transport::{CommandTransport, run_to_completion};
use crate::types::{ExitSignal, ModuleId};

/// One reversible action, recorded when its module succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub module: ModuleId,
    /// Position in completion order; larger means more recent.
    pub ordinal: u64,
    pub command: String,
}

/// Result of running one rollback command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub module: ModuleId,
    pub command: String,
    pub exit: Option<ExitSignal>,
    /// Set when the command could not be started at all.
    pub error: Option<String>,
}

impl RollbackOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.exit, Some(ExitSignal::Success))
    }
}

/// What `rollback_all` did, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub outcomes: Vec<RollbackOutcome>,
}

impl RollbackReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &RollbackOutcome> {
        self.outcomes.iter().filter(|o| o.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RollbackOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    /// Whether every rollback command succeeded.
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(RollbackOutcome::succeeded)
    }
}

/// Owns the active rollback list.
#[derive(Debug, Clone, Default)]
pub struct RollbackManager {
    entries: Vec<RollbackEntry>,
    next_ordinal: u64,
}

impl RollbackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an undo action for a module that just succeeded.
    pub fn record(&mut self, module: &str, command: &str) {
        let entry = RollbackEntry {
            module: module.to_string(),
            ordinal: self.next_ordinal,
            command: command.to_string(),
        };
        self.next_ordinal += 1;
        self.entries.push(entry);
    }

    /// Active entries, oldest first.
    pub fn entries(&self) -> &[RollbackEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the active list with persisted entries.
    pub fn restore(&mut self, mut entries: Vec<RollbackEntry>) {
        entries.sort_by_key(|e| e.ordinal);
        self.next_ordinal = entries.last().map(|e| e.ordinal + 1).unwrap_or(0);
        self.entries = entries;
    }

    /// Execute every recorded rollback, newest first, strictly one at a time.
    ///
    /// A failing rollback is reported and the replay carries on with older
    /// entries. Replaying an empty list is a no-op. Callers that checkpoint
    /// between entries drive [`RollbackManager::rollback_next`] themselves.
    pub async fn rollback_all(
        &mut self,
        transport: &dyn CommandTransport,
        events: &EventSink,
    ) -> RollbackReport {
        let mut report = RollbackReport::default();
        while let Some(outcome) = self.rollback_next(transport, events).await {
            report.outcomes.push(outcome);
        }
        report
    }

    /// Consume the newest entry and run its command.
    ///
    /// The entry leaves the active list whether or not the command succeeds.
    /// Returns `None` once the list is empty.
    pub async fn rollback_next(
        &mut self,
        transport: &dyn CommandTransport,
        events: &EventSink,
    ) -> Option<RollbackOutcome> {
        let entry = self.entries.pop()?;
        info!(
            module = %entry.module,
            cmd = %entry.command,
            remaining = self.entries.len(),
            "rolling back module"
        );

        let outcome = match run_to_completion(transport, &entry.command).await {
            Ok(exit) => RollbackOutcome {
                module: entry.module,
                command: entry.command,
                exit: Some(exit),
                error: None,
            },
            Err(e) => RollbackOutcome {
                module: entry.module,
                command: entry.command,
                exit: None,
                error: Some(e.to_string()),
            },
        };

        let detail = if outcome.succeeded() {
            "rollback succeeded".to_string()
        } else {
            warn!(
                module = %outcome.module,
                exit = ?outcome.exit,
                error = ?outcome.error,
                "rollback failed; continuing with earlier modules"
            );
            match (&outcome.exit, &outcome.error) {
                (_, Some(error)) => format!("rollback could not start: {error}"),
                (Some(exit), None) => format!("rollback failed ({exit})"),
                (None, None) => "rollback failed".to_string(),
            }
        };
        events.emit(&outcome.module, EventKind::Rollback, detail);

        Some(outcome)
    }

    /// Drop all entries once the run is fully reverted or fully succeeded.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
