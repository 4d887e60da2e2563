#![allow(dead_code)]

use provisor::config::{ConfigFile, ModuleConfig, RawConfigFile};
use provisor::errors::Result;
use provisor::types::{CheckpointMode, ErrorCategory};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Defaults to an in-memory checkpoint so tests never touch the filesystem
/// unless they ask for it.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.config.checkpoint_mode = CheckpointMode::Memory;
        Self { config }
    }

    pub fn with_module(mut self, id: &str, module: ModuleConfig) -> Self {
        self.config.module.insert(id.to_string(), module);
        self
    }

    pub fn with_remediation(mut self, category: ErrorCategory, cmd: &str) -> Self {
        self.config
            .remediation
            .insert(category.as_str().to_string(), cmd.to_string());
        self
    }

    pub fn with_patterns(mut self, category: &str, patterns: &[&str]) -> Self {
        self.config.patterns.insert(
            category.to_string(),
            patterns.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.config.concurrency = Some(n);
        self
    }

    pub fn trip_threshold(mut self, n: u32) -> Self {
        self.config.config.trip_threshold = n;
        self
    }

    pub fn max_inline_retries(mut self, n: u32) -> Self {
        self.config.config.max_inline_retries = n;
        self
    }

    pub fn systemic(mut self, categories: &[ErrorCategory]) -> Self {
        self.config.config.systemic = categories.to_vec();
        self
    }

    pub fn file_checkpoint(mut self, path: &str) -> Self {
        self.config.config.checkpoint_mode = CheckpointMode::File;
        self.config.config.checkpoint = path.to_string();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ModuleConfig`.
pub struct ModuleConfigBuilder {
    module: ModuleConfig,
}

impl ModuleConfigBuilder {
    pub fn new(install: &str) -> Self {
        Self {
            module: ModuleConfig {
                install: install.to_string(),
                rollback: None,
                after: vec![],
                timeout: None,
                retries: 0,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.module.after.push(dep.to_string());
        self
    }

    pub fn rollback(mut self, cmd: &str) -> Self {
        self.module.rollback = Some(cmd.to_string());
        self
    }

    pub fn timeout(mut self, duration: &str) -> Self {
        self.module.timeout = Some(duration.to_string());
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.module.retries = n;
        self
    }

    pub fn build(self) -> ModuleConfig {
        self.module
    }
}
