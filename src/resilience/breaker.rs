// src/resilience/breaker.rs

//! Per-category circuit breaker.
//!
//! Each error category keeps a consecutive-failure counter. Reaching the trip
//! threshold sets the category's trip flag; a success of that category resets
//! both. Tripped *systemic* categories (network, permission by default) ask
//! the orchestrator to abort the whole run; tripped module-local categories
//! only stop further retries of modules failing that way.
//!
//! The breaker is an explicit value owned by the orchestrator, so concurrent
//! runs never share counters.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::ErrorCategory;

/// Counter and trip flag for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerEntry {
    pub consecutive_failures: u32,
    pub tripped: bool,
}

/// Persisted breaker state: category → counter/flag.
pub type CircuitBreakerState = BTreeMap<ErrorCategory, BreakerEntry>;

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    systemic: BTreeSet<ErrorCategory>,
    state: CircuitBreakerState,
}

impl CircuitBreaker {
    /// Default number of consecutive failures that trips a category.
    pub const DEFAULT_THRESHOLD: u32 = 3;

    pub fn new(threshold: u32, systemic: impl IntoIterator<Item = ErrorCategory>) -> Self {
        Self {
            threshold: threshold.max(1),
            systemic: systemic.into_iter().collect(),
            state: CircuitBreakerState::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_systemic(&self, category: ErrorCategory) -> bool {
        self.systemic.contains(&category)
    }

    /// Feed one result into the breaker.
    ///
    /// Returns `true` if this call tripped the category.
    pub fn record_result(&mut self, category: ErrorCategory, success: bool) -> bool {
        let threshold = self.threshold;
        let entry = self.state.entry(category).or_default();

        if success {
            if entry.consecutive_failures > 0 || entry.tripped {
                debug!(%category, "breaker reset by success");
            }
            *entry = BreakerEntry::default();
            return false;
        }

        entry.consecutive_failures += 1;
        debug!(
            %category,
            failures = entry.consecutive_failures,
            threshold,
            "breaker recorded failure"
        );

        if !entry.tripped && entry.consecutive_failures >= threshold {
            entry.tripped = true;
            warn!(
                %category,
                failures = entry.consecutive_failures,
                systemic = self.systemic.contains(&category),
                "circuit breaker tripped"
            );
            return true;
        }

        false
    }

    pub fn is_tripped(&self, category: ErrorCategory) -> bool {
        self.state
            .get(&category)
            .map(|entry| entry.tripped)
            .unwrap_or(false)
    }

    pub fn consecutive_failures(&self, category: ErrorCategory) -> u32 {
        self.state
            .get(&category)
            .map(|entry| entry.consecutive_failures)
            .unwrap_or(0)
    }

    /// Whether any tripped category is systemic.
    pub fn should_abort_all(&self) -> bool {
        self.tripped_systemic().is_some()
    }

    /// First tripped systemic category, if any.
    pub fn tripped_systemic(&self) -> Option<ErrorCategory> {
        self.state
            .iter()
            .find(|(category, entry)| entry.tripped && self.systemic.contains(category))
            .map(|(category, _)| *category)
    }

    /// All tripped categories.
    pub fn tripped(&self) -> Vec<ErrorCategory> {
        self.state
            .iter()
            .filter(|(_, entry)| entry.tripped)
            .map(|(category, _)| *category)
            .collect()
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    /// Replace the counters with persisted ones, re-deriving trip flags
    /// against the current threshold.
    pub fn restore(&mut self, state: CircuitBreakerState) {
        self.state = state
            .into_iter()
            .map(|(category, mut entry)| {
                entry.tripped = entry.tripped || entry.consecutive_failures >= self.threshold;
                (category, entry)
            })
            .collect();
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_THRESHOLD,
            [ErrorCategory::Network, ErrorCategory::Permission],
        )
    }
}
