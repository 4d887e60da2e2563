// src/exec/transport.rs

//! How commands reach the target machine.
//!
//! The orchestrator treats install, rollback and remediation commands as
//! opaque strings. A [`CommandTransport`] turns one into a running process
//! and hands back a [`CommandHandle`]: a stream of combined output lines, the
//! eventual exit signal, and a kill switch.
//!
//! - [`LocalShellTransport`] runs commands through `sh -c` (`cmd /C` on Windows).
//! - [`SshTransport`] runs them on a remote host through `ssh`.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::errors::{ProvisorError, Result};
use crate::types::ExitSignal;

/// Capacity of the per-command output channel.
const LINE_BUFFER: usize = 256;

/// How long output may keep trickling in after the process exited.
///
/// Background children (`svc &`, `nohup ...`) inherit the pipes and can
/// hold them open indefinitely, so EOF alone never marks completion.
pub const EXIT_GRACE: Duration = Duration::from_millis(250);

/// One step of a running command, as seen by its supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Line(String),
    /// The process exited and its output has been drained (or the grace
    /// period ran out).
    Exited(ExitSignal),
}

/// A command that has been started by a transport.
#[derive(Debug)]
pub struct CommandHandle {
    /// Combined stdout/stderr, one line per message.
    lines: mpsc::Receiver<String>,
    exit: oneshot::Receiver<ExitSignal>,
    kill: Option<oneshot::Sender<()>>,
    status: Option<ExitSignal>,
    /// Set once the process exited; output after this instant is dropped.
    drain_until: Option<Instant>,
    output_done: bool,
}

impl CommandHandle {
    pub fn new(
        lines: mpsc::Receiver<String>,
        exit: oneshot::Receiver<ExitSignal>,
        kill: oneshot::Sender<()>,
    ) -> Self {
        Self {
            lines,
            exit,
            kill: Some(kill),
            status: None,
            drain_until: None,
            output_done: false,
        }
    }

    /// Next output line, or the exit signal once the command is done.
    ///
    /// Completion is driven by the process exit, not by EOF on its output:
    /// lines already produced are still returned, for at most
    /// [`EXIT_GRACE`] after the exit. Cancel safe.
    pub async fn next_output(&mut self) -> CommandOutput {
        loop {
            if self.output_done {
                return CommandOutput::Exited(self.wait().await);
            }
            if self.drain_until.is_none() && self.status.is_some() {
                self.drain_until = Some(Instant::now() + EXIT_GRACE);
            }

            match self.drain_until {
                None => {
                    tokio::select! {
                        biased;
                        line = self.lines.recv() => match line {
                            Some(line) => return CommandOutput::Line(line),
                            None => self.output_done = true,
                        },
                        exit = &mut self.exit => {
                            self.status = Some(exit.unwrap_or(ExitSignal::Killed));
                            self.drain_until = Some(Instant::now() + EXIT_GRACE);
                        }
                    }
                }
                Some(until) => {
                    if Instant::now() >= until {
                        self.stop_reading();
                        continue;
                    }
                    tokio::select! {
                        biased;
                        line = self.lines.recv() => match line {
                            Some(line) => return CommandOutput::Line(line),
                            None => self.output_done = true,
                        },
                        _ = sleep_until(until) => self.stop_reading(),
                    }
                }
            }
        }
    }

    fn stop_reading(&mut self) {
        debug!("output still open after exit; a background process holds the pipes");
        self.lines.close();
        self.output_done = true;
    }

    /// Ask the transport to terminate the command. Idempotent.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            if kill.send(()).is_err() {
                debug!("kill requested for a command that already finished");
            }
        }
    }

    /// Wait for the exit signal, ignoring output. Safe to call again after it
    /// resolved.
    ///
    /// A transport that goes away without reporting counts as `Killed`.
    pub async fn wait(&mut self) -> ExitSignal {
        if let Some(status) = self.status {
            return status;
        }
        let status = (&mut self.exit).await.unwrap_or(ExitSignal::Killed);
        self.status = Some(status);
        status
    }
}

/// Executes opaque commands, locally or remotely.
pub trait CommandTransport: Send + Sync + fmt::Debug {
    /// Start `command`. Must be called from within a Tokio runtime.
    fn execute(&self, command: &str) -> Result<CommandHandle>;
}

/// Runs commands in a local shell.
#[derive(Debug, Clone, Default)]
pub struct LocalShellTransport;

impl CommandTransport for LocalShellTransport {
    fn execute(&self, command: &str) -> Result<CommandHandle> {
        let cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        spawn_process(cmd, command)
    }
}

/// Runs commands on a remote host via `ssh [options] host -- command`.
#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    options: Vec<String>,
}

impl SshTransport {
    pub fn new(host: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            host: host.into(),
            options,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl CommandTransport for SshTransport {
    fn execute(&self, command: &str) -> Result<CommandHandle> {
        let mut cmd = Command::new("ssh");
        cmd.args(&self.options).arg(&self.host).arg("--").arg(command);
        spawn_process(cmd, command)
    }
}

/// Spawn `cmd` with piped output and wire it to a [`CommandHandle`].
fn spawn_process(mut cmd: Command, label: &str) -> Result<CommandHandle> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for command '{label}'"))
        .map_err(|e| ProvisorError::Transport(format!("{e:#}")))?;

    let (line_tx, line_rx) = mpsc::channel::<String>(LINE_BUFFER);
    let (exit_tx, exit_rx) = oneshot::channel::<ExitSignal>();
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, line_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, line_tx);
    }

    let label = label.to_string();
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            request = &mut kill_rx => {
                // A dropped handle means nobody is supervising the process anymore.
                match request {
                    Ok(()) => info!(cmd = %label, "kill requested; terminating process"),
                    Err(_) => debug!(cmd = %label, "command handle dropped; terminating process"),
                }
                if let Err(e) = child.kill().await {
                    warn!(cmd = %label, error = %e, "failed to kill child process");
                }
                child.wait().await
            }
        };

        let signal = match status {
            Ok(status) if status.success() => ExitSignal::Success,
            Ok(status) => match status.code() {
                Some(code) => ExitSignal::Failed(code),
                None => ExitSignal::Killed,
            },
            Err(e) => {
                warn!(cmd = %label, error = %e, "failed waiting for child process");
                ExitSignal::Failed(-1)
            }
        };

        debug!(cmd = %label, exit = %signal, "process exited");
        let _ = exit_tx.send(signal);
    });

    Ok(CommandHandle::new(line_rx, exit_rx, kill_tx))
}

/// Forward lines from a child pipe into the shared channel.
///
/// Keeps draining after the receiver is gone so the child never blocks on a
/// full pipe.
fn forward_lines<R>(pipe: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        let mut receiver_open = true;

        while let Ok(Some(line)) = lines.next_line().await {
            if receiver_open && tx.send(line).await.is_err() {
                receiver_open = false;
            }
        }
    });
}

/// Run a command to completion, logging its output at debug level.
///
/// Used for remediation and rollback commands, whose output is not classified.
pub async fn run_to_completion(transport: &dyn CommandTransport, command: &str) -> Result<ExitSignal> {
    let mut handle = transport.execute(command)?;

    loop {
        match handle.next_output().await {
            CommandOutput::Line(line) => debug!(cmd = %command, "output: {}", line),
            CommandOutput::Exited(exit) => return Ok(exit),
        }
    }
}
