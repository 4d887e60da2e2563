// src/engine/mod.rs

//! Orchestration engine for provisor.
//!
//! This module ties together:
//! - the module graph (what may run next),
//! - the circuit breaker and rollback manager (what to do about failures),
//! - the state store (durable progress),
//! - the main event loop that reacts to module completions and shutdown.
//!
//! The pure state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::exec::ExecutionRecord;
use crate::types::ErrorCategory;

/// Events flowing into the orchestrator from workers and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A worker finished executing a module (successfully or not).
    ModuleCompleted(ExecutionRecord),
    /// Graceful shutdown requested (e.g. Ctrl-C): stop dispatching, let
    /// in-flight modules finish, keep the checkpoint resumable.
    ShutdownRequested,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every module reached a terminal status without a systemic abort.
    /// Some modules may still have failed.
    Completed,
    /// A systemic breaker tripped; completed modules were rolled back.
    Aborted { category: ErrorCategory },
    /// Stopped on request before all modules ran; resumable.
    Interrupted,
}

pub mod core;
pub mod report;
pub mod runtime;

pub use self::core::CoreOrchestrator;
pub use self::report::RunReport;
pub use self::runtime::Orchestrator;
