// tests/execution_monitor.rs

use std::sync::Arc;
use std::time::Duration;

use provisor::dag::{ModuleDef, ScheduledModule};
use provisor::events::{EventKind, EventSink};
use provisor::exec::{ExecutionMonitor, PatternTable, RemediationTable};
use provisor::types::{ErrorCategory, ExitSignal};
use provisor_test_utils::scripted_transport::{ScriptedRun, ScriptedTransport};
use provisor_test_utils::{init_tracing, with_timeout};

const INSTALL: &str = "install-widget";
const FIX_PERMS: &str = "chown -R me /opt/widget";

fn monitor(transport: &ScriptedTransport, remediation: RemediationTable, max: u32) -> ExecutionMonitor {
    ExecutionMonitor::new(
        Arc::new(transport.clone()),
        PatternTable::builtin().unwrap(),
        remediation,
        max,
        EventSink::disabled(),
    )
}

fn module(timeout: Option<Duration>) -> ScheduledModule {
    let mut def = ModuleDef::new("widget", INSTALL);
    if let Some(t) = timeout {
        def = def.timeout(t);
    }
    ScheduledModule::from_def(&def, 1)
}

fn perms_remediation() -> RemediationTable {
    RemediationTable::new().with(ErrorCategory::Permission, FIX_PERMS)
}

fn permission_denied() -> ScriptedRun {
    ScriptedRun::hanging().lines(&["cp: cannot create '/opt/widget': Permission denied"])
}

#[tokio::test]
async fn test_remediates_twice_then_succeeds() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport
        .script(INSTALL, permission_denied())
        .script(INSTALL, permission_denied())
        .script(INSTALL, ScriptedRun::success().lines(&["installed widget"]));

    let record = with_timeout(monitor(&transport, perms_remediation(), 3).run(&module(None))).await;

    assert!(record.succeeded());
    assert_eq!(record.exit, ExitSignal::Success);
    assert_eq!(record.remediations, 2);
    assert_eq!(record.category_hits.get(&ErrorCategory::Permission), Some(&2));
    assert_eq!(
        transport.invocations(),
        vec![INSTALL, FIX_PERMS, INSTALL, FIX_PERMS, INSTALL]
    );
}

#[tokio::test]
async fn test_exhausted_inline_budget_fails_with_last_category() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.always(INSTALL, permission_denied());

    let record = with_timeout(monitor(&transport, perms_remediation(), 2).run(&module(None))).await;

    assert!(!record.succeeded());
    assert_eq!(record.exit, ExitSignal::Killed);
    assert_eq!(record.category, Some(ErrorCategory::Permission));
    assert_eq!(record.remediations, 2);
    assert_eq!(transport.count(INSTALL), 3);
    assert_eq!(transport.count(FIX_PERMS), 2);
}

#[tokio::test]
async fn test_failed_remediation_ends_the_execution() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.always(INSTALL, permission_denied());
    transport.script(FIX_PERMS, ScriptedRun::failure(1));

    let record = with_timeout(monitor(&transport, perms_remediation(), 3).run(&module(None))).await;

    assert_eq!(record.exit, ExitSignal::Killed);
    assert_eq!(record.failure_category(), ErrorCategory::Permission);
    assert_eq!(record.remediations, 1);
    assert_eq!(transport.invocations(), vec![INSTALL, FIX_PERMS]);
}

#[tokio::test]
async fn test_timeout_kills_the_install() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.script(INSTALL, ScriptedRun::hanging().lines(&["downloading..."]));

    let record = with_timeout(
        monitor(&transport, RemediationTable::new(), 3)
            .run(&module(Some(Duration::from_millis(50)))),
    )
    .await;

    assert_eq!(record.exit, ExitSignal::Killed);
    assert_eq!(record.category, Some(ErrorCategory::Timeout));
}

#[tokio::test]
async fn test_timeout_covers_remediation_too() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.script(INSTALL, permission_denied());
    transport.script(FIX_PERMS, ScriptedRun::hanging());

    let record = with_timeout(
        monitor(&transport, perms_remediation(), 3).run(&module(Some(Duration::from_millis(100)))),
    )
    .await;

    assert_eq!(record.exit, ExitSignal::Killed);
    assert_eq!(record.category, Some(ErrorCategory::Timeout));
    assert_eq!(record.remediations, 1);
    assert_eq!(transport.count(INSTALL), 1);
}

#[tokio::test]
async fn test_non_remediable_category_is_recorded_without_intervention() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.script(
        INSTALL,
        ScriptedRun::failure(6).lines(&[
            "fetching index",
            "curl: (6) Could not resolve host: mirror.invalid",
        ]),
    );

    let record = with_timeout(monitor(&transport, perms_remediation(), 3).run(&module(None))).await;

    assert_eq!(record.exit, ExitSignal::Failed(6));
    assert_eq!(record.category, Some(ErrorCategory::Network));
    assert_eq!(record.category_hits.get(&ErrorCategory::Network), Some(&1));
    assert_eq!(record.remediations, 0);
    assert_eq!(transport.invocations(), vec![INSTALL]);
}

#[tokio::test]
async fn test_unmatched_failure_is_unclassified() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.script(INSTALL, ScriptedRun::failure(2).lines(&["bye"]));

    let record = with_timeout(monitor(&transport, RemediationTable::new(), 3).run(&module(None))).await;

    assert_eq!(record.exit, ExitSignal::Failed(2));
    assert_eq!(record.category, Some(ErrorCategory::Unclassified));
    assert!(record.category_hits.is_empty());
}

#[tokio::test]
async fn test_start_failure_is_a_failed_record() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.unstartable(INSTALL);

    let record = with_timeout(monitor(&transport, RemediationTable::new(), 3).run(&module(None))).await;

    assert!(!record.succeeded());
    assert_eq!(record.failure_category(), ErrorCategory::Unclassified);
}

#[tokio::test]
async fn test_classified_lines_are_emitted_as_events() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.script(
        INSTALL,
        ScriptedRun::success().lines(&["warning: connection reset, retrying", "ok"]),
    );

    let (events, mut rx) = EventSink::channel(16);
    let monitor = ExecutionMonitor::new(
        Arc::new(transport.clone()),
        PatternTable::builtin().unwrap(),
        RemediationTable::new(),
        3,
        events,
    );

    let record = with_timeout(monitor.run(&module(None))).await;
    assert!(record.succeeded());
    drop(monitor);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::LineClassified);
    assert_eq!(event.module, "widget");
    assert!(event.detail.starts_with("network"));
    assert!(rx.recv().await.is_none());
}
