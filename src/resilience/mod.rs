// src/resilience/mod.rs

//! Failure containment.
//!
//! - [`breaker`] counts consecutive failures per error category and decides
//!   when to stop retrying or abort the run.
//! - [`rollback`] records undo actions for succeeded modules and replays them
//!   in reverse on abort.

pub mod breaker;
pub mod rollback;

pub use breaker::{BreakerEntry, CircuitBreaker, CircuitBreakerState};
pub use rollback::{RollbackEntry, RollbackManager, RollbackOutcome, RollbackReport};
