// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical module identifier used throughout the crate.
pub type ModuleId = String;

/// Lifecycle status of a single module within a provisioning run.
///
/// `Pending -> Running -> {Succeeded, Failed}` is the normal path. A module
/// that already succeeded in a previous run is restored as
/// `Skipped(AlreadySatisfied)`; a successful module whose undo action ran
/// during an abort ends as `RolledBack`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
    Skipped(SkipReason),
}

impl ModuleStatus {
    /// Whether a dependent may treat this module as installed.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(
            self,
            ModuleStatus::Succeeded | ModuleStatus::Skipped(SkipReason::AlreadySatisfied)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ModuleStatus::Pending | ModuleStatus::Running)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Pending => write!(f, "pending"),
            ModuleStatus::Running => write!(f, "running"),
            ModuleStatus::Succeeded => write!(f, "succeeded"),
            ModuleStatus::Failed => write!(f, "failed"),
            ModuleStatus::RolledBack => write!(f, "rolled back"),
            ModuleStatus::Skipped(reason) => write!(f, "skipped ({reason})"),
        }
    }
}

/// Why a module was never dispatched in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Restored from a checkpoint in which the module had succeeded.
    AlreadySatisfied,
    /// An upstream module (named here) failed for good.
    DependencyFailed(ModuleId),
    /// The run was aborted before the module became ready.
    RunAborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadySatisfied => write!(f, "already satisfied"),
            SkipReason::DependencyFailed(dep) => write!(f, "dependency '{dep}' failed"),
            SkipReason::RunAborted => write!(f, "run aborted"),
        }
    }
}

/// Failure classes recognised in module output (plus the synthetic
/// `Timeout` and `Unclassified` classes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MissingDependency,
    Permission,
    Network,
    Runtime,
    Timeout,
    Unclassified,
}

impl ErrorCategory {
    /// Categories that can be matched against output lines, in priority order.
    pub const CLASSIFIABLE: [ErrorCategory; 4] = [
        ErrorCategory::MissingDependency,
        ErrorCategory::Permission,
        ErrorCategory::Network,
        ErrorCategory::Runtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::MissingDependency => "missing_dependency",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Network => "network",
            ErrorCategory::Runtime => "runtime",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "missing_dependency" => Ok(ErrorCategory::MissingDependency),
            "permission" => Ok(ErrorCategory::Permission),
            "network" => Ok(ErrorCategory::Network),
            "runtime" => Ok(ErrorCategory::Runtime),
            "timeout" => Ok(ErrorCategory::Timeout),
            "unclassified" => Ok(ErrorCategory::Unclassified),
            other => Err(format!(
                "unknown error category: {other} (expected one of missing_dependency, \
                 permission, network, runtime, timeout, unclassified)"
            )),
        }
    }
}

/// How a command invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitSignal {
    Success,
    Failed(i32),
    /// Terminated by us (timeout, exhausted remediation budget) or by a signal.
    Killed,
}

impl ExitSignal {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitSignal::Success)
    }
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitSignal::Success => write!(f, "exit 0"),
            ExitSignal::Failed(code) => write!(f, "exit {code}"),
            ExitSignal::Killed => write!(f, "killed"),
        }
    }
}

/// Where checkpoints are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointMode {
    /// Written atomically to the configured checkpoint path.
    #[default]
    File,
    /// Kept in memory only (lost on restart).
    Memory,
}
