// src/dag/module.rs

//! Module definitions and the per-dispatch view handed to executors.

use std::time::Duration;

use crate::types::ModuleId;

/// Static definition of one installable module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDef {
    pub id: ModuleId,
    /// Direct dependencies (the `after = [...]` list).
    pub after: Vec<ModuleId>,
    /// Opaque install command.
    pub install: String,
    /// Opaque undo command, if the module can be reverted.
    pub rollback: Option<String>,
    /// Upper bound on the whole execution, remediation included.
    pub timeout: Option<Duration>,
    /// Orchestrator-level re-dispatch budget after a failed execution.
    pub retries: u32,
}

impl ModuleDef {
    /// Convenience constructor for a module with no dependencies or extras.
    pub fn new(id: impl Into<ModuleId>, install: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            after: Vec::new(),
            install: install.into(),
            rollback: None,
            timeout: None,
            retries: 0,
        }
    }

    pub fn after(mut self, dep: impl Into<ModuleId>) -> Self {
        self.after.push(dep.into());
        self
    }

    pub fn rollback(mut self, cmd: impl Into<String>) -> Self {
        self.rollback = Some(cmd.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// A module the orchestrator wants an executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledModule {
    pub id: ModuleId,
    pub install: String,
    pub timeout: Option<Duration>,
    /// 1-based attempt number for this module within the run.
    pub attempt: u32,
}

impl ScheduledModule {
    pub fn from_def(def: &ModuleDef, attempt: u32) -> Self {
        Self {
            id: def.id.clone(),
            install: def.install.clone(),
            timeout: def.timeout,
            attempt,
        }
    }
}
