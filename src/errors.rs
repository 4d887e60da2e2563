// src/errors.rs

//! Crate-wide error type.

use thiserror::Error;

use crate::types::{ErrorCategory, ModuleId};

#[derive(Error, Debug)]
pub enum ProvisorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("module '{module}' depends on unknown module '{dependency}'")]
    UnknownDependency {
        module: ModuleId,
        dependency: ModuleId,
    },

    #[error("Cycle detected in module graph: {0}")]
    CyclicDependency(String),

    #[error("Checkpoint persistence failed: {0}")]
    Persistence(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(
        "circuit breaker for systemic category '{0}' is tripped from a previous run; \
         rerun with --reset-breaker once the cause is fixed"
    )]
    BreakerTripped(ErrorCategory),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ProvisorError>;
