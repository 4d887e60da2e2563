// tests/core_orchestrator.rs

use std::collections::BTreeMap;

use chrono::Utc;

use provisor::dag::{ModuleDef, ModuleGraph, ScheduledModule};
use provisor::engine::{CoreOrchestrator, RunOutcome};
use provisor::errors::ProvisorError;
use provisor::events::EventSink;
use provisor::resilience::{
    BreakerEntry, CircuitBreaker, RollbackEntry, RollbackOutcome, RollbackReport,
};
use provisor::store::{CheckpointSnapshot, SNAPSHOT_VERSION};
use provisor::types::{ErrorCategory, ExitSignal, ModuleStatus, SkipReason};
use provisor_test_utils::fake_executor::{FakeOutcome, fake_record};

fn core(defs: &[ModuleDef], breaker: CircuitBreaker, concurrency: usize) -> CoreOrchestrator {
    CoreOrchestrator::new(
        ModuleGraph::build(defs).unwrap(),
        breaker,
        concurrency,
        EventSink::disabled(),
    )
}

fn ids(modules: &[ScheduledModule]) -> Vec<&str> {
    let mut ids: Vec<_> = modules.iter().map(|m| m.id.as_str()).collect();
    ids.sort();
    ids
}

fn complete(core: &mut CoreOrchestrator, module: &ScheduledModule, outcome: FakeOutcome) {
    core.handle_completion(fake_record(module, outcome));
}

fn status(core: &CoreOrchestrator, id: &str) -> ModuleStatus {
    core.status_of(id).cloned().unwrap()
}

#[test]
fn test_dispatch_respects_dependencies_and_concurrency() {
    let mut core = core(
        &[
            ModuleDef::new("a", "a"),
            ModuleDef::new("b", "b"),
            ModuleDef::new("c", "c"),
            ModuleDef::new("d", "d").after("a"),
        ],
        CircuitBreaker::default(),
        2,
    );

    let first = core.dispatch_ready();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|m| m.id != "d"));
    assert!(first.iter().all(|m| m.attempt == 1));
    assert_eq!(core.running_count(), 2);
    assert!(core.dispatch_ready().is_empty());

    for module in &first {
        complete(&mut core, module, FakeOutcome::Succeed);
    }

    let mut seen: Vec<String> = first.iter().map(|m| m.id.clone()).collect();
    loop {
        let next = core.dispatch_ready();
        if next.is_empty() {
            break;
        }
        assert!(next.len() <= 2);
        for module in &next {
            seen.push(module.id.clone());
            complete(&mut core, module, FakeOutcome::Succeed);
        }
    }

    seen.sort();
    assert_eq!(seen, vec!["a", "b", "c", "d"]);
    assert!(core.fully_succeeded());
    assert_eq!(core.finish(), RunOutcome::Completed);
}

#[test]
fn test_failure_skips_descendants_but_not_siblings() {
    let mut core = core(
        &[
            ModuleDef::new("base", "base"),
            ModuleDef::new("x", "x").after("base"),
            ModuleDef::new("y", "y").after("base"),
            ModuleDef::new("z", "z").after("x"),
            ModuleDef::new("zz", "zz").after("z"),
        ],
        CircuitBreaker::default(),
        4,
    );

    let base = core.dispatch_ready();
    assert_eq!(ids(&base), vec!["base"]);
    complete(&mut core, &base[0], FakeOutcome::Succeed);

    let wave = core.dispatch_ready();
    assert_eq!(ids(&wave), vec!["x", "y"]);
    let x = wave.iter().find(|m| m.id == "x").unwrap();
    let y = wave.iter().find(|m| m.id == "y").unwrap();

    complete(&mut core, x, FakeOutcome::Fail(ErrorCategory::Runtime));
    assert_eq!(status(&core, "x"), ModuleStatus::Failed);

    // The failed branch is skipped on the next sweep, blaming the root.
    assert!(core.dispatch_ready().is_empty());
    let blamed = ModuleStatus::Skipped(SkipReason::DependencyFailed("x".into()));
    assert_eq!(status(&core, "z"), blamed);
    assert_eq!(status(&core, "zz"), blamed);
    assert_eq!(status(&core, "y"), ModuleStatus::Running);

    complete(&mut core, y, FakeOutcome::Succeed);
    assert!(core.dispatch_ready().is_empty());
    assert_eq!(core.running_count(), 0);
    assert_eq!(core.finish(), RunOutcome::Completed);
    assert!(!core.fully_succeeded());
    assert!(core.statuses().values().all(ModuleStatus::is_terminal));
}

#[test]
fn test_orchestrator_level_retry_redispatches_module() {
    let mut core = core(
        &[ModuleDef::new("flaky", "flaky").retries(1)],
        CircuitBreaker::default(),
        1,
    );

    let first = core.dispatch_ready();
    complete(&mut core, &first[0], FakeOutcome::Fail(ErrorCategory::Runtime));
    assert_eq!(status(&core, "flaky"), ModuleStatus::Pending);

    let second = core.dispatch_ready();
    assert_eq!(second[0].attempt, 2);
    complete(&mut core, &second[0], FakeOutcome::Fail(ErrorCategory::Runtime));

    // Budget of one retry is used up.
    assert_eq!(status(&core, "flaky"), ModuleStatus::Failed);
    assert_eq!(core.records().len(), 2);
}

#[test]
fn test_tripped_local_category_stops_retries_without_aborting() {
    let mut core = core(
        &[
            ModuleDef::new("a", "a").retries(5),
            ModuleDef::new("b", "b"),
        ],
        CircuitBreaker::new(1, [ErrorCategory::Network]),
        1,
    );

    let first = core.dispatch_ready();
    assert_eq!(first.len(), 1);
    let first_id = first[0].id.clone();
    complete(&mut core, &first[0], FakeOutcome::Fail(ErrorCategory::Runtime));

    assert!(core.breaker().is_tripped(ErrorCategory::Runtime));
    assert_eq!(status(&core, &first_id), ModuleStatus::Failed);
    assert!(!core.is_draining());

    // The other module still runs.
    let next = core.dispatch_ready();
    assert_eq!(next.len(), 1);
    assert_ne!(next[0].id, first_id);
}

#[test]
fn test_systemic_trip_drains_and_aborts() {
    let mut core = core(
        &[
            ModuleDef::new("n1", "n1").rollback("undo n1"),
            ModuleDef::new("n2", "n2"),
            ModuleDef::new("ok", "ok").rollback("undo ok"),
            ModuleDef::new("later", "later").after("ok"),
        ],
        CircuitBreaker::new(2, [ErrorCategory::Network]),
        3,
    );

    let wave = core.dispatch_ready();
    assert_eq!(ids(&wave), vec!["n1", "n2", "ok"]);
    let by_id = |id: &str| wave.iter().find(|m| m.id == id).unwrap().clone();

    complete(&mut core, &by_id("n1"), FakeOutcome::Fail(ErrorCategory::Network));
    assert!(!core.is_draining());
    complete(&mut core, &by_id("n2"), FakeOutcome::Fail(ErrorCategory::Network));
    assert!(core.is_draining());

    // In-flight work is allowed to finish; nothing new starts.
    complete(&mut core, &by_id("ok"), FakeOutcome::Succeed);
    assert_eq!(status(&core, "ok"), ModuleStatus::Succeeded);
    assert!(core.dispatch_ready().is_empty());

    assert_eq!(
        core.finish(),
        RunOutcome::Aborted {
            category: ErrorCategory::Network
        }
    );
    assert_eq!(
        status(&core, "later"),
        ModuleStatus::Skipped(SkipReason::RunAborted)
    );

    let entries: Vec<_> = core.rollback().entries().iter().map(|e| e.module.as_str()).collect();
    assert_eq!(entries, vec!["ok"]);

    core.apply_rollback_report(&RollbackReport {
        outcomes: vec![RollbackOutcome {
            module: "ok".into(),
            command: "undo ok".into(),
            exit: Some(ExitSignal::Success),
            error: None,
        }],
    });
    assert_eq!(status(&core, "ok"), ModuleStatus::RolledBack);
    assert_eq!(status(&core, "n1"), ModuleStatus::Failed);
}

fn snapshot(statuses: &[(&str, ModuleStatus)]) -> CheckpointSnapshot {
    CheckpointSnapshot {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        statuses: statuses
            .iter()
            .map(|(id, s)| (id.to_string(), s.clone()))
            .collect(),
        breaker: BTreeMap::new(),
        rollback: vec![],
    }
}

#[test]
fn test_restore_never_redispatches_succeeded_modules() {
    let mut core = core(
        &[
            ModuleDef::new("a", "a"),
            ModuleDef::new("b", "b").after("a"),
            ModuleDef::new("c", "c").after("a"),
        ],
        CircuitBreaker::default(),
        4,
    );

    let mut snap = snapshot(&[
        ("a", ModuleStatus::Succeeded),
        ("b", ModuleStatus::Failed),
        ("c", ModuleStatus::Running),
        ("removed", ModuleStatus::Succeeded),
    ]);
    snap.rollback.push(RollbackEntry {
        module: "a".into(),
        ordinal: 4,
        command: "undo a".into(),
    });
    core.restore(snap, false).unwrap();

    assert_eq!(
        status(&core, "a"),
        ModuleStatus::Skipped(SkipReason::AlreadySatisfied)
    );
    assert_eq!(status(&core, "b"), ModuleStatus::Pending);
    assert_eq!(status(&core, "c"), ModuleStatus::Pending);
    assert!(core.status_of("removed").is_none());
    assert_eq!(core.rollback().entries().len(), 1);

    let dispatched = core.dispatch_ready();
    assert_eq!(ids(&dispatched), vec!["b", "c"]);
}

#[test]
fn test_restore_refuses_tripped_systemic_breaker_unless_reset() {
    let defs = [ModuleDef::new("a", "a")];
    let mut snap = snapshot(&[("a", ModuleStatus::Failed)]);
    snap.breaker.insert(
        ErrorCategory::Permission,
        BreakerEntry {
            consecutive_failures: 3,
            tripped: true,
        },
    );

    let mut refused = core(&defs, CircuitBreaker::default(), 1);
    match refused.restore(snap.clone(), false) {
        Err(ProvisorError::BreakerTripped(category)) => {
            assert_eq!(category, ErrorCategory::Permission)
        }
        other => panic!("Expected BreakerTripped, got: {:?}", other),
    }

    let mut reset = core(&defs, CircuitBreaker::default(), 1);
    reset.restore(snap, true).unwrap();
    assert!(reset.breaker().state().is_empty());
    assert_eq!(reset.dispatch_ready().len(), 1);
}

#[test]
fn test_completion_for_module_not_running_is_ignored() {
    let mut core = core(&[ModuleDef::new("a", "a")], CircuitBreaker::default(), 1);

    let stray = ScheduledModule::from_def(&ModuleDef::new("a", "a"), 1);
    complete(&mut core, &stray, FakeOutcome::Succeed);

    assert_eq!(status(&core, "a"), ModuleStatus::Pending);
    assert!(core.records().is_empty());
}

#[test]
fn test_shutdown_stops_dispatch_and_reports_interrupted() {
    let mut core = core(
        &[ModuleDef::new("a", "a"), ModuleDef::new("b", "b").after("a")],
        CircuitBreaker::default(),
        1,
    );

    let first = core.dispatch_ready();
    core.request_shutdown();
    complete(&mut core, &first[0], FakeOutcome::Succeed);

    assert!(core.dispatch_ready().is_empty());
    assert_eq!(core.finish(), RunOutcome::Interrupted);
    assert_eq!(status(&core, "b"), ModuleStatus::Pending);

    let snap = core.snapshot();
    assert_eq!(snap.statuses.get("a"), Some(&ModuleStatus::Succeeded));
    assert_eq!(snap.statuses.get("b"), Some(&ModuleStatus::Pending));
}
