// src/events.rs

//! Execution events for presentation layers (log output, `--events` file).
//!
//! Emission never blocks: events go through a bounded channel with
//! `try_send`, and are dropped when nobody is listening or the consumer
//! falls behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::ModuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A module changed status.
    Status,
    /// An output line matched an error category.
    LineClassified,
    /// A remediation command started or finished.
    Remediation,
    /// A rollback command ran.
    Rollback,
    /// A breaker counter tripped.
    Breaker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionEvent {
    pub module: ModuleId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

/// Cheap, cloneable handle for emitting [`ProvisionEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ProvisionEvent>>,
}

impl EventSink {
    /// A sink plus the receiving end for a consumer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProvisionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, module: &str, kind: EventKind, detail: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };

        let event = ProvisionEvent {
            module: module.to_string(),
            timestamp: Utc::now(),
            kind,
            detail: detail.into(),
        };

        if let Err(e) = tx.try_send(event) {
            debug!(module = %module, ?kind, error = %e, "dropping execution event");
        }
    }
}
