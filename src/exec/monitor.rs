// src/exec/monitor.rs

//! Execution monitor: supervises one module's install command.
//!
//! The monitor is a cooperative consumer of the command's output. For each
//! line it classifies, and on a category that has a remediation command it:
//!
//! 1. terminates the running install,
//! 2. runs the remediation to completion,
//! 3. relaunches the same install,
//!
//! up to `max_inline_retries` times. One more remediable hit after that
//! terminates the install and reports failure with the last-seen category.
//! Categories without a remediation are counted and otherwise ignored.
//!
//! A per-module timeout is a deadline over the whole execution, remediation
//! included; hitting it kills whatever is running and yields the `timeout`
//! category.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, info, warn};

use crate::dag::ScheduledModule;
use crate::errors::{ProvisorError, Result};
use crate::events::{EventKind, EventSink};
use crate::exec::classify::PatternTable;
use crate::exec::transport::{CommandHandle, CommandOutput, CommandTransport, run_to_completion};
use crate::types::{ErrorCategory, ExitSignal, ModuleId};

/// Category → remediation command.
#[derive(Debug, Clone, Default)]
pub struct RemediationTable {
    commands: BTreeMap<ErrorCategory, String>,
}

impl RemediationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `[remediation]`, whose keys are category names.
    pub fn from_config(raw: &BTreeMap<String, String>) -> Result<Self> {
        let mut table = Self::new();
        for (key, command) in raw {
            let category: ErrorCategory = key.parse().map_err(ProvisorError::Config)?;
            if !ErrorCategory::CLASSIFIABLE.contains(&category) {
                return Err(ProvisorError::Config(format!(
                    "[remediation].{key}: category '{category}' never comes from output \
                     and cannot be remediated inline"
                )));
            }
            if command.trim().is_empty() {
                return Err(ProvisorError::Config(format!(
                    "[remediation].{key} must not be empty"
                )));
            }
            table.commands.insert(category, command.clone());
        }
        Ok(table)
    }

    pub fn with(mut self, category: ErrorCategory, command: impl Into<String>) -> Self {
        self.commands.insert(category, command.into());
        self
    }

    pub fn get(&self, category: ErrorCategory) -> Option<&str> {
        self.commands.get(&category).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ErrorCategory, &str)> {
        self.commands.iter().map(|(c, cmd)| (*c, cmd.as_str()))
    }
}

/// Audit record of one module execution. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub module: ModuleId,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Last category seen. Always set on failure (`unclassified` when no
    /// line matched); on success it records what was remediated, if anything.
    pub category: Option<ErrorCategory>,
    pub exit: ExitSignal,
    /// Remediate-and-relaunch cycles used.
    pub remediations: u32,
    /// Matched-line counts per category.
    pub category_hits: BTreeMap<ErrorCategory, u32>,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.exit.is_success()
    }

    /// Category a failure is charged to.
    pub fn failure_category(&self) -> ErrorCategory {
        self.category.unwrap_or(ErrorCategory::Unclassified)
    }

    /// Record for an execution that never produced a result (e.g. a worker panic).
    pub fn crashed(module: &ScheduledModule, started_at: DateTime<Utc>) -> Self {
        Self {
            module: module.id.clone(),
            attempt: module.attempt,
            started_at,
            finished_at: Utc::now(),
            category: Some(ErrorCategory::Unclassified),
            exit: ExitSignal::Failed(-1),
            remediations: 0,
            category_hits: BTreeMap::new(),
        }
    }
}

/// How supervising one launch of the install command ended.
enum Supervision {
    Exited(ExitSignal),
    Remediable(ErrorCategory),
    TimedOut,
}

/// Accumulated state across the launches of one execution.
struct Progress {
    last_category: Option<ErrorCategory>,
    category_hits: BTreeMap<ErrorCategory, u32>,
    remediations: u32,
}

#[derive(Debug)]
pub struct ExecutionMonitor {
    transport: Arc<dyn CommandTransport>,
    patterns: PatternTable,
    remediation: RemediationTable,
    max_inline_retries: u32,
    events: EventSink,
}

impl ExecutionMonitor {
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        patterns: PatternTable,
        remediation: RemediationTable,
        max_inline_retries: u32,
        events: EventSink,
    ) -> Self {
        Self {
            transport,
            patterns,
            remediation,
            max_inline_retries,
            events,
        }
    }

    /// Run a module's install command under supervision.
    ///
    /// Never fails: transport errors become a failed record.
    pub async fn run(&self, module: &ScheduledModule) -> ExecutionRecord {
        let started_at = Utc::now();
        // A timeout too far out to represent is no deadline at all.
        let deadline = module.timeout.and_then(|t| Instant::now().checked_add(t));
        let mut progress = Progress {
            last_category: None,
            category_hits: BTreeMap::new(),
            remediations: 0,
        };

        info!(
            module = %module.id,
            attempt = module.attempt,
            cmd = %module.install,
            "starting module install"
        );

        let (exit, category) = loop {
            let mut handle = match self.transport.execute(&module.install) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(module = %module.id, error = %e, "failed to start install command");
                    break (ExitSignal::Failed(-1), progress.last_category);
                }
            };

            match self.supervise(module, &mut handle, deadline, &mut progress).await {
                Supervision::Exited(signal) => break (signal, progress.last_category),
                Supervision::TimedOut => {
                    terminate(&mut handle).await;
                    warn!(module = %module.id, "module execution exceeded its timeout");
                    break (ExitSignal::Killed, Some(ErrorCategory::Timeout));
                }
                Supervision::Remediable(category) => {
                    terminate(&mut handle).await;

                    if progress.remediations >= self.max_inline_retries {
                        warn!(
                            module = %module.id,
                            %category,
                            remediations = progress.remediations,
                            "inline remediation budget exhausted"
                        );
                        break (ExitSignal::Killed, Some(category));
                    }

                    progress.remediations += 1;
                    match self.remediate(module, category, deadline).await {
                        RemediationResult::Applied => continue,
                        RemediationResult::Failed => break (ExitSignal::Killed, Some(category)),
                        RemediationResult::TimedOut => {
                            break (ExitSignal::Killed, Some(ErrorCategory::Timeout));
                        }
                    }
                }
            }
        };

        let category = if exit.is_success() {
            category
        } else {
            Some(category.unwrap_or(ErrorCategory::Unclassified))
        };

        info!(
            module = %module.id,
            attempt = module.attempt,
            exit = %exit,
            category = ?category,
            remediations = progress.remediations,
            "module install finished"
        );

        ExecutionRecord {
            module: module.id.clone(),
            attempt: module.attempt,
            started_at,
            finished_at: Utc::now(),
            category,
            exit,
            remediations: progress.remediations,
            category_hits: progress.category_hits,
        }
    }

    /// Read output line by line until the command exits, a remediable
    /// category shows up, or the deadline passes.
    async fn supervise(
        &self,
        module: &ScheduledModule,
        handle: &mut CommandHandle,
        deadline: Option<Instant>,
        progress: &mut Progress,
    ) -> Supervision {
        loop {
            let output = match deadline {
                Some(deadline) => tokio::select! {
                    output = handle.next_output() => output,
                    _ = sleep_until(deadline) => return Supervision::TimedOut,
                },
                None => handle.next_output().await,
            };

            let line = match output {
                CommandOutput::Line(line) => line,
                CommandOutput::Exited(exit) => return Supervision::Exited(exit),
            };

            debug!(module = %module.id, "output: {}", line);

            let Some(category) = self.patterns.classify(&line) else {
                continue;
            };

            *progress.category_hits.entry(category).or_insert(0) += 1;
            progress.last_category = Some(category);
            self.events
                .emit(&module.id, EventKind::LineClassified, format!("{category}: {line}"));

            if self.remediation.get(category).is_some() {
                return Supervision::Remediable(category);
            }
        }
    }

    async fn remediate(
        &self,
        module: &ScheduledModule,
        category: ErrorCategory,
        deadline: Option<Instant>,
    ) -> RemediationResult {
        let Some(command) = self.remediation.get(category) else {
            return RemediationResult::Failed;
        };

        info!(module = %module.id, %category, cmd = %command, "running remediation");
        self.events.emit(
            &module.id,
            EventKind::Remediation,
            format!("{category}: running `{command}`"),
        );

        let run = run_to_completion(self.transport.as_ref(), command);
        let result = match deadline {
            Some(deadline) => match timeout_at(deadline, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(module = %module.id, %category, "remediation ran past the module timeout");
                    return RemediationResult::TimedOut;
                }
            },
            None => run.await,
        };

        match result {
            Ok(ExitSignal::Success) => {
                self.events
                    .emit(&module.id, EventKind::Remediation, format!("{category}: applied"));
                RemediationResult::Applied
            }
            Ok(exit) => {
                warn!(module = %module.id, %category, %exit, "remediation command failed");
                self.events.emit(
                    &module.id,
                    EventKind::Remediation,
                    format!("{category}: failed ({exit})"),
                );
                RemediationResult::Failed
            }
            Err(e) => {
                warn!(module = %module.id, %category, error = %e, "remediation could not start");
                self.events.emit(
                    &module.id,
                    EventKind::Remediation,
                    format!("{category}: could not start ({e})"),
                );
                RemediationResult::Failed
            }
        }
    }
}

enum RemediationResult {
    Applied,
    Failed,
    TimedOut,
}

/// Kill a running command and reap it.
async fn terminate(handle: &mut CommandHandle) {
    handle.kill();
    let exit = handle.wait().await;
    debug!(exit = %exit, "terminated command");
}
