// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `provisor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "provisor",
    version,
    about = "Install modules in dependency order with retries, circuit breaking and rollback.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Provisor.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Provisor.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROVISOR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the install order, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Override `[config].concurrency`.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Ignore any existing checkpoint and start from scratch.
    #[arg(long)]
    pub fresh: bool,

    /// Resume with cleared circuit breaker counters.
    #[arg(long)]
    pub reset_breaker: bool,

    /// Append execution events as JSON lines to this file.
    #[arg(long, value_name = "PATH")]
    pub events: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
