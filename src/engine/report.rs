// src/engine/report.rs

use std::collections::BTreeMap;

use crate::engine::RunOutcome;
use crate::exec::ExecutionRecord;
use crate::exit_codes;
use crate::resilience::RollbackReport;
use crate::types::{ErrorCategory, ModuleId, ModuleStatus};

/// Final summary of one orchestration run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub statuses: BTreeMap<ModuleId, ModuleStatus>,
    /// Execution records in completion order (retries included).
    pub records: Vec<ExecutionRecord>,
    /// Breaker categories still tripped at the end of the run.
    pub tripped: Vec<ErrorCategory>,
    /// Present only when a systemic abort triggered rollback.
    pub rollback: Option<RollbackReport>,
}

impl RunReport {
    /// Completed and every module is installed.
    pub fn is_full_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
            && self.statuses.values().all(ModuleStatus::satisfies_dependents)
    }

    pub fn modules_with<F>(&self, pred: F) -> Vec<&str>
    where
        F: Fn(&ModuleStatus) -> bool,
    {
        self.statuses
            .iter()
            .filter(|(_, status)| pred(status))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn failed_modules(&self) -> Vec<&str> {
        self.modules_with(|s| matches!(s, ModuleStatus::Failed))
    }

    pub fn count(&self, status: &ModuleStatus) -> usize {
        self.statuses.values().filter(|s| *s == status).count()
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Aborted { .. } => exit_codes::ABORTED,
            RunOutcome::Interrupted => exit_codes::INTERRUPTED,
            RunOutcome::Completed if self.is_full_success() => exit_codes::OK,
            RunOutcome::Completed => exit_codes::PARTIAL,
        }
    }
}
