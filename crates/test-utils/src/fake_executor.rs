use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use provisor::dag::ScheduledModule;
use provisor::engine::RuntimeEvent;
use provisor::errors::Result;
use provisor::exec::{ExecutionRecord, ExecutorBackend};
use provisor::types::{ErrorCategory, ExitSignal};

/// Predetermined result of one fake execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    Succeed,
    Fail(ErrorCategory),
}

/// Shared view into what a `FakeExecutor` did, usable after the executor
/// has been moved into an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    executed: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeProbe {
    /// Module ids in dispatch order (retries appear again).
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// A fake executor that:
/// - records which modules were "run"
/// - after `delay`, reports a record built from the scripted outcome
///   (success when nothing is scripted).
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    outcomes: HashMap<String, VecDeque<FakeOutcome>>,
    delay: Duration,
    probe: FakeProbe,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            outcomes: HashMap::new(),
            delay: Duration::ZERO,
            probe: FakeProbe::default(),
        }
    }

    /// Queue an outcome for the next execution of `module`.
    pub fn outcome(mut self, module: &str, outcome: FakeOutcome) -> Self {
        self.outcomes
            .entry(module.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn probe(&self) -> FakeProbe {
        self.probe.clone()
    }
}

/// Build the record a real monitor would produce for `outcome`.
pub fn fake_record(module: &ScheduledModule, outcome: FakeOutcome) -> ExecutionRecord {
    let now = Utc::now();
    let (exit, category) = match outcome {
        FakeOutcome::Succeed => (ExitSignal::Success, None),
        FakeOutcome::Fail(category) => (ExitSignal::Failed(1), Some(category)),
    };
    let mut category_hits = BTreeMap::new();
    if let Some(category) = category {
        category_hits.insert(category, 1);
    }

    ExecutionRecord {
        module: module.id.clone(),
        attempt: module.attempt,
        started_at: now,
        finished_at: now,
        category,
        exit,
        remediations: 0,
        category_hits,
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_modules(
        &mut self,
        modules: Vec<ScheduledModule>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        for module in modules {
            let outcome = self
                .outcomes
                .get_mut(&module.id)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(FakeOutcome::Succeed);

            self.probe.executed.lock().unwrap().push(module.id.clone());
            let now_running = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe
                .max_in_flight
                .fetch_max(now_running, Ordering::SeqCst);

            let tx = self.runtime_tx.clone();
            let in_flight = Arc::clone(&self.probe.in_flight);
            let delay = self.delay;

            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
                let record = fake_record(&module, outcome);
                let _ = tx.send(RuntimeEvent::ModuleCompleted(record)).await;
            });
        }

        Box::pin(async { Ok(()) })
    }
}
