//! Shared scaffolding for provisor's integration tests.

pub mod builders;
pub mod fake_executor;
pub mod scripted_transport;

pub use builders::{ConfigFileBuilder, ModuleConfigBuilder};
pub use fake_executor::{FakeExecutor, FakeOutcome};
pub use scripted_transport::{ScriptedRun, ScriptedTransport};

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use provisor::logging::LOG_ENV;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Deadline for `with_timeout`. Scripted runs finish in milliseconds, so
/// hitting it means the orchestrator is stuck.
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// Initialise tracing for tests, captured per test by the harness.
///
/// The filter is read from `PROVISOR_LOG`, then `RUST_LOG`, e.g.
/// `PROVISOR_LOG=provisor=trace cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("provisor=info,warn"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future under `TEST_DEADLINE`.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    with_deadline(TEST_DEADLINE, f).await
}

/// Run a future under an explicit deadline, panicking if it elapses.
pub async fn with_deadline<F, T>(deadline: Duration, f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(deadline, f).await {
        Ok(value) => value,
        Err(_) => panic!("test did not finish within {deadline:?}"),
    }
}
