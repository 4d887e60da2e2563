// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod exit_codes;
pub mod logging;
pub mod resilience;
pub mod store;
pub mod types;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::ModuleGraph;
use crate::engine::{CoreOrchestrator, Orchestrator, RunReport, RuntimeEvent};
use crate::errors::ProvisorError;
use crate::events::{EventKind, EventSink, ProvisionEvent};
use crate::exec::{
    CommandTransport, ExecutionMonitor, LocalShellTransport, MonitorBackend, SshTransport,
};
use crate::resilience::CircuitBreaker;
use crate::store::{StateStore, build_store};
use crate::types::{CheckpointMode, ModuleStatus};

/// Capacity of the execution event channel; events beyond it are dropped.
const EVENT_CAPACITY: usize = 1024;

/// How long to wait for the event consumer to drain after a run.
const EVENT_FLUSH: Duration = Duration::from_secs(2);

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading and validation
/// - checkpoint store and resume
/// - transport, execution monitor and executor backend
/// - event presentation (log lines, optional JSON-lines file)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(exit_codes::OK);
    }

    let concurrency = match args.concurrency {
        Some(0) => {
            return Err(ProvisorError::Config("--concurrency must be at least 1".into()).into());
        }
        Some(n) => n,
        None => cfg.config.effective_concurrency(),
    };

    let checkpoint_path = resolve_checkpoint_path(&config_path, &cfg.config.checkpoint);
    if cfg.config.checkpoint_mode == CheckpointMode::File {
        info!(path = %checkpoint_path.display(), concurrency, "checkpointing to file");
    } else {
        info!(concurrency, "checkpointing in memory only; progress will not survive restarts");
    }
    let store = build_store(cfg.config.checkpoint_mode, checkpoint_path);

    let transport = build_transport(&cfg);

    let (events, event_rx) = EventSink::channel(EVENT_CAPACITY);
    let consumer = spawn_event_consumer(event_rx, args.events.as_deref().map(PathBuf::from))
        .await?;

    let settings = RunSettings {
        concurrency,
        fresh: args.fresh,
        reset_breaker: args.reset_breaker,
    };

    // Ctrl-C → graceful shutdown. If the handler cannot be installed the run
    // simply cannot be interrupted.
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let result = orchestrate(&cfg, transport, store, events, settings, shutdown).await;

    // Sinks drop with the orchestrator; flush the consumer even when the run
    // failed, so the events leading up to the error are kept.
    if tokio::time::timeout(EVENT_FLUSH, consumer).await.is_err() {
        warn!("event consumer did not finish in time; some events may be missing");
    }

    let report = result?;
    print_report(&report);
    Ok(report.exit_code())
}

/// Knobs that come from the command line rather than the config file.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub concurrency: usize,
    /// Ignore any stored checkpoint.
    pub fresh: bool,
    /// Resume with cleared breaker counters.
    pub reset_breaker: bool,
}

/// Run one orchestration over a validated config.
///
/// Restores from `store` unless `settings.fresh`, executes every module
/// through `transport`, and returns the final report. `shutdown` resolving
/// requests a graceful stop.
///
/// Errors are reserved for conditions that make the run itself invalid
/// (refused resume, checkpoint write failure); module failures are part of
/// the report.
pub async fn orchestrate<F>(
    cfg: &ConfigFile,
    transport: Arc<dyn CommandTransport>,
    store: Box<dyn StateStore>,
    events: EventSink,
    settings: RunSettings,
    shutdown: F,
) -> errors::Result<RunReport>
where
    F: Future<Output = ()> + Send + 'static,
{
    let graph = ModuleGraph::build(cfg.module_defs())?;

    let breaker = CircuitBreaker::new(
        cfg.config.trip_threshold,
        cfg.config.systemic.iter().copied(),
    );
    let mut core = CoreOrchestrator::new(graph, breaker, settings.concurrency, events.clone());

    if settings.fresh {
        info!("--fresh given; ignoring any existing checkpoint");
    } else if let Some(snapshot) = store.load()? {
        core.restore(snapshot, settings.reset_breaker)?;
    }

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let monitor = Arc::new(ExecutionMonitor::new(
        Arc::clone(&transport),
        cfg.patterns().clone(),
        cfg.remediation().clone(),
        cfg.config.max_inline_retries,
        events.clone(),
    ));
    let executor = MonitorBackend::new(monitor, rt_tx.clone());

    let shutdown_task = tokio::spawn(async move {
        shutdown.await;
        let _ = rt_tx.send(RuntimeEvent::ShutdownRequested).await;
    });

    let orchestrator = Orchestrator::new(core, store, rt_rx, executor, transport, events);
    let result = orchestrator.run().await;
    shutdown_task.abort();
    result
}

/// Relative checkpoint paths are taken relative to the config file's
/// directory, so resumes work regardless of the working directory.
fn resolve_checkpoint_path(config_path: &Path, checkpoint: &str) -> PathBuf {
    let checkpoint = PathBuf::from(checkpoint);
    if checkpoint.is_absolute() {
        return checkpoint;
    }
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(checkpoint),
        _ => checkpoint,
    }
}

fn build_transport(cfg: &ConfigFile) -> Arc<dyn CommandTransport> {
    match &cfg.transport.ssh_host {
        Some(host) => {
            info!(%host, "running commands over ssh");
            Arc::new(SshTransport::new(host.clone(), cfg.transport.ssh_options.clone()))
        }
        None => Arc::new(LocalShellTransport),
    }
}

/// Log every execution event and, if requested, append it to a JSON-lines
/// file. The task ends once every `EventSink` has been dropped.
async fn spawn_event_consumer(
    mut rx: mpsc::Receiver<ProvisionEvent>,
    events_path: Option<PathBuf>,
) -> Result<JoinHandle<()>> {
    let mut file = match events_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let f = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("opening events file {}", path.display()))?;
            Some(f)
        }
        None => None,
    };

    Ok(tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.kind {
                EventKind::Status => {
                    debug!(target: "provisor::events", module = %event.module, status = %event.detail, "status");
                }
                kind => {
                    info!(target: "provisor::events", module = %event.module, ?kind, "{}", event.detail);
                }
            }

            let Some(f) = file.as_mut() else {
                continue;
            };
            let mut line = match serde_json::to_vec(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to serialize event");
                    continue;
                }
            };
            line.push(b'\n');
            if let Err(e) = f.write_all(&line).await {
                warn!(error = %e, "failed to write events file; disabling");
                file = None;
            }
        }

        if let Some(f) = file.as_mut() {
            let _ = f.flush().await;
        }
    }))
}

/// Dry-run output: modules in install order with their settings.
fn print_dry_run(cfg: &ConfigFile) {
    println!("provisor dry-run");
    println!("  config.concurrency = {}", cfg.config.effective_concurrency());
    println!("  config.trip_threshold = {}", cfg.config.trip_threshold);
    println!("  config.max_inline_retries = {}", cfg.config.max_inline_retries);
    println!("  config.checkpoint = {} ({:?})", cfg.config.checkpoint, cfg.config.checkpoint_mode);
    println!("  config.systemic = {:?}", cfg.config.systemic);
    match &cfg.transport.ssh_host {
        Some(host) => println!("  transport = ssh {host}"),
        None => println!("  transport = local shell"),
    }
    for (category, command) in cfg.remediation().iter() {
        println!("  remediation.{category} = {command}");
    }
    println!();

    let graph = match ModuleGraph::build(cfg.module_defs()) {
        Ok(graph) => graph,
        Err(e) => {
            println!("invalid module graph: {e}");
            return;
        }
    };

    println!("install order ({} modules):", graph.len());
    for (index, def) in graph.modules().enumerate() {
        println!("  {}. {}", index + 1, def.id);
        println!("      install: {}", def.install);
        if let Some(ref rollback) = def.rollback {
            println!("      rollback: {rollback}");
        }
        if !def.after.is_empty() {
            println!("      after: {:?}", def.after);
        }
        if let Some(timeout) = def.timeout {
            println!("      timeout: {timeout:?}");
        }
        if def.retries > 0 {
            println!("      retries: {}", def.retries);
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_report(report: &RunReport) {
    println!();
    println!("provisor: {:?}", report.outcome);
    for (id, status) in &report.statuses {
        let last = report.records.iter().rev().find(|r| &r.module == id);
        match last {
            Some(record) if !matches!(status, ModuleStatus::Skipped(_)) => println!(
                "  {id}: {status} (attempt {}, exit {}, remediations {}{})",
                record.attempt,
                record.exit,
                record.remediations,
                record
                    .category
                    .map(|c| format!(", category {c}"))
                    .unwrap_or_default()
            ),
            _ => println!("  {id}: {status}"),
        }
    }

    if !report.tripped.is_empty() {
        println!("  tripped breakers: {:?}", report.tripped);
    }

    if let Some(rollback) = &report.rollback {
        println!(
            "  rollback: {} succeeded, {} failed",
            rollback.succeeded().count(),
            rollback.failed().count()
        );
        for outcome in rollback.failed() {
            println!(
                "    {}: {}",
                outcome.module,
                outcome
                    .error
                    .clone()
                    .or_else(|| outcome.exit.map(|e| e.to_string()))
                    .unwrap_or_default()
            );
        }
    }
}
