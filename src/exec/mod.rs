// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`transport`] starts opaque commands locally or over ssh and streams
//!   their output.
//! - [`classify`] maps output lines to error categories.
//! - [`monitor`] supervises one module's install: classification, inline
//!   remediation, timeout.
//! - [`backend`] provides the `ExecutorBackend` trait the orchestrator
//!   dispatches through, and the production `MonitorBackend`.

pub mod backend;
pub mod classify;
pub mod monitor;
pub mod transport;

pub use backend::{ExecutorBackend, MonitorBackend};
pub use classify::PatternTable;
pub use monitor::{ExecutionMonitor, ExecutionRecord, RemediationTable};
pub use transport::{
    CommandHandle, CommandOutput, CommandTransport, EXIT_GRACE, LocalShellTransport, SshTransport,
    run_to_completion,
};
