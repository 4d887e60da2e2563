//! A `CommandTransport` that plays back scripted runs instead of spawning
//! processes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use provisor::errors::{ProvisorError, Result};
use provisor::exec::{CommandHandle, CommandTransport};
use provisor::types::ExitSignal;

/// What one invocation of a command does.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub lines: Vec<String>,
    pub exit: ExitSignal,
    /// Wait this long before producing any output.
    pub delay: Duration,
    /// After the lines, never exit on its own; only a kill ends it.
    pub hang: bool,
}

impl ScriptedRun {
    pub fn success() -> Self {
        Self {
            lines: vec![],
            exit: ExitSignal::Success,
            delay: Duration::ZERO,
            hang: false,
        }
    }

    pub fn failure(code: i32) -> Self {
        Self {
            exit: ExitSignal::Failed(code),
            ..Self::success()
        }
    }

    /// Prints `lines`, then waits to be killed.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::success()
        }
    }

    pub fn lines(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Consumed front to back, one per invocation.
    queued: HashMap<String, VecDeque<ScriptedRun>>,
    /// Used once a command's queue is empty.
    fallback: HashMap<String, ScriptedRun>,
    unstartable: HashSet<String>,
    invocations: Vec<String>,
}

/// Cloneable scripted transport; clones share scripts and the invocation log.
///
/// Unscripted commands succeed immediately with no output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a run for the next invocation of `command`.
    pub fn script(&self, command: &str, run: ScriptedRun) -> &Self {
        let mut inner = self.inner.lock().unwrap();
        inner
            .queued
            .entry(command.to_string())
            .or_default()
            .push_back(run);
        self
    }

    /// Behaviour for every invocation of `command` not covered by a queued run.
    pub fn always(&self, command: &str, run: ScriptedRun) -> &Self {
        let mut inner = self.inner.lock().unwrap();
        inner.fallback.insert(command.to_string(), run);
        self
    }

    /// Make `command` fail to start at all.
    pub fn unstartable(&self, command: &str) -> &Self {
        let mut inner = self.inner.lock().unwrap();
        inner.unstartable.insert(command.to_string());
        self
    }

    /// Every command executed so far, in order.
    pub fn invocations(&self) -> Vec<String> {
        self.inner.lock().unwrap().invocations.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .invocations
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }
}

impl CommandTransport for ScriptedTransport {
    fn execute(&self, command: &str) -> Result<CommandHandle> {
        let run = {
            let mut inner = self.inner.lock().unwrap();
            inner.invocations.push(command.to_string());

            if inner.unstartable.contains(command) {
                return Err(ProvisorError::Transport(format!(
                    "scripted start failure for '{command}'"
                )));
            }

            let queued = inner
                .queued
                .get_mut(command)
                .and_then(|queue| queue.pop_front());
            queued
                .or_else(|| inner.fallback.get(command).cloned())
                .unwrap_or_else(ScriptedRun::success)
        };

        let (line_tx, line_rx) = mpsc::channel::<String>(64);
        let (exit_tx, exit_rx) = oneshot::channel::<ExitSignal>();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            if !run.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(run.delay) => {}
                    _ = &mut kill_rx => {
                        let _ = exit_tx.send(ExitSignal::Killed);
                        return;
                    }
                }
            }

            for line in run.lines {
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
            drop(line_tx);

            if run.hang {
                let _ = (&mut kill_rx).await;
                let _ = exit_tx.send(ExitSignal::Killed);
            } else {
                let _ = exit_tx.send(run.exit);
            }
        });

        Ok(CommandHandle::new(line_rx, exit_rx, kill_tx))
    }
}
