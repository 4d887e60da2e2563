// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::dag::ModuleDef;
use crate::exec::{PatternTable, RemediationTable};
use crate::types::{CheckpointMode, ErrorCategory};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// concurrency = 4
/// trip_threshold = 3
///
/// [remediation]
/// missing_dependency = "sudo apt-get update"
///
/// [module.base]
/// install = "sudo apt-get install -y build-essential"
///
/// [module.rust]
/// install = "curl https://sh.rustup.rs -sSf | sh -s -- -y"
/// rollback = "rustup self uninstall -y"
/// after = ["base"]
/// timeout = "10m"
/// ```
///
/// All sections except `[module.<id>]` are optional.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Per-category regex overrides; keys are category names.
    #[serde(default)]
    pub patterns: BTreeMap<String, Vec<String>>,

    /// Per-category remediation commands; keys are category names.
    #[serde(default)]
    pub remediation: BTreeMap<String, String>,

    #[serde(default)]
    pub transport: TransportSection,

    /// All modules from `[module.<id>]`, keyed by module id.
    #[serde(default)]
    pub module: BTreeMap<String, ModuleConfig>,
}

/// A validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)`, so holders
/// can rely on the module graph being resolvable and acyclic and on every
/// pattern having compiled.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub transport: TransportSection,
    pub module: BTreeMap<String, ModuleConfig>,
    patterns: PatternTable,
    remediation: RemediationTable,
    modules: Vec<ModuleDef>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        raw: RawConfigFile,
        patterns: PatternTable,
        remediation: RemediationTable,
        modules: Vec<ModuleDef>,
    ) -> Self {
        Self {
            config: raw.config,
            transport: raw.transport,
            module: raw.module,
            patterns,
            remediation,
            modules,
        }
    }

    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    pub fn remediation(&self) -> &RemediationTable {
        &self.remediation
    }

    /// Module definitions in id order, with durations already parsed.
    pub fn module_defs(&self) -> &[ModuleDef] {
        &self.modules
    }
}

/// `[config]` section: orchestration tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of modules installing at once.
    ///
    /// `None` means "number of available CPUs".
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Consecutive failures of one category before its breaker trips.
    #[serde(default = "default_trip_threshold")]
    pub trip_threshold: u32,

    /// How many remediate-and-relaunch cycles a single module execution may use.
    #[serde(default = "default_max_inline_retries")]
    pub max_inline_retries: u32,

    /// Checkpoint location (relative paths resolve against the config file's directory).
    #[serde(default = "default_checkpoint")]
    pub checkpoint: String,

    #[serde(default)]
    pub checkpoint_mode: CheckpointMode,

    /// Categories whose tripped breaker aborts the whole run.
    #[serde(default = "default_systemic")]
    pub systemic: Vec<ErrorCategory>,
}

fn default_trip_threshold() -> u32 {
    3
}

fn default_max_inline_retries() -> u32 {
    3
}

fn default_checkpoint() -> String {
    ".provisor/checkpoint.json".to_string()
}

fn default_systemic() -> Vec<ErrorCategory> {
    vec![ErrorCategory::Network, ErrorCategory::Permission]
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: None,
            trip_threshold: default_trip_threshold(),
            max_inline_retries: default_max_inline_retries(),
            checkpoint: default_checkpoint(),
            checkpoint_mode: CheckpointMode::default(),
            systemic: default_systemic(),
        }
    }
}

impl ConfigSection {
    /// Effective worker count: configured value, else available parallelism.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// `[transport]` section. Without `ssh_host`, commands run in a local shell.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TransportSection {
    #[serde(default)]
    pub ssh_host: Option<String>,

    /// Extra arguments passed to `ssh` before the host.
    #[serde(default)]
    pub ssh_options: Vec<String>,
}

/// `[module.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    /// Shell command that installs the module.
    pub install: String,

    /// Optional shell command that undoes `install`.
    #[serde(default)]
    pub rollback: Option<String>,

    /// Modules that must be installed first.
    #[serde(default)]
    pub after: Vec<String>,

    /// Duration string (e.g. `"90s"`, `"10m"`) bounding the whole execution.
    #[serde(default)]
    pub timeout: Option<String>,

    /// How many times the orchestrator may re-dispatch the module after a failure.
    #[serde(default)]
    pub retries: u32,
}
