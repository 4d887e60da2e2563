// tests/local_shell.rs
#![cfg(unix)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use provisor::dag::{ModuleDef, ScheduledModule};
use provisor::events::EventSink;
use provisor::exec::{
    CommandOutput, CommandTransport, ExecutionMonitor, LocalShellTransport, PatternTable,
    RemediationTable, run_to_completion,
};
use provisor::types::ExitSignal;
use provisor_test_utils::{init_tracing, with_deadline, with_timeout};

/// Exits at once but leaves a child holding stdout and stderr open.
const DAEMONIZING: &str = "sleep 30 & echo started; exit 0";

#[tokio::test]
async fn test_collects_stdout_and_stderr_lines() {
    init_tracing();
    let transport = LocalShellTransport;
    let mut handle = transport
        .execute("printf 'one\\ntwo\\n'; echo three >&2")
        .unwrap();

    let mut lines = BTreeSet::new();
    let exit = loop {
        match with_timeout(handle.next_output()).await {
            CommandOutput::Line(line) => {
                lines.insert(line);
            }
            CommandOutput::Exited(exit) => break exit,
        }
    };

    assert_eq!(
        lines,
        BTreeSet::from(["one".to_string(), "three".to_string(), "two".to_string()])
    );
    assert_eq!(exit, ExitSignal::Success);
    // Cached after the first wait.
    assert_eq!(handle.wait().await, ExitSignal::Success);
}

#[tokio::test]
async fn test_exit_codes_are_reported() {
    init_tracing();
    let exit = with_timeout(run_to_completion(&LocalShellTransport, "echo bye; exit 3"))
        .await
        .unwrap();
    assert_eq!(exit, ExitSignal::Failed(3));
}

#[tokio::test]
async fn test_kill_terminates_a_long_running_command() {
    init_tracing();
    let mut handle = LocalShellTransport.execute("sleep 30").unwrap();

    handle.kill();
    handle.kill();

    let exit = with_timeout(handle.wait()).await;
    assert_eq!(exit, ExitSignal::Killed);
}

#[tokio::test]
async fn test_background_child_does_not_block_run_to_completion() {
    init_tracing();
    let exit = with_deadline(
        Duration::from_secs(3),
        run_to_completion(&LocalShellTransport, DAEMONIZING),
    )
    .await
    .unwrap();
    assert_eq!(exit, ExitSignal::Success);
}

#[tokio::test]
async fn test_monitor_completes_install_that_leaves_a_background_child() {
    init_tracing();
    let monitor = ExecutionMonitor::new(
        Arc::new(LocalShellTransport),
        PatternTable::builtin().unwrap(),
        RemediationTable::new(),
        3,
        EventSink::disabled(),
    );
    let module = ScheduledModule::from_def(&ModuleDef::new("daemon", DAEMONIZING), 1);

    let record = with_deadline(Duration::from_secs(3), monitor.run(&module)).await;

    assert_eq!(record.exit, ExitSignal::Success);
    assert!(record.succeeded());
    assert_eq!(record.category, None);
}
