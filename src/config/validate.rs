// src/config/validate.rs

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::{ModuleDef, ModuleGraph};
use crate::errors::{ProvisorError, Result};
use crate::exec::{PatternTable, RemediationTable};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ProvisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_modules(&raw)?;
        validate_global_config(&raw)?;

        let modules = module_defs(&raw)?;
        // Resolves dependencies and rejects cycles.
        ModuleGraph::build(&modules)?;

        let patterns = PatternTable::with_overrides(&raw.patterns)?;
        let remediation = RemediationTable::from_config(&raw.remediation)?;

        Ok(ConfigFile::new_unchecked(raw, patterns, remediation, modules))
    }
}

fn ensure_has_modules(cfg: &RawConfigFile) -> Result<()> {
    if cfg.module.is_empty() {
        return Err(ProvisorError::Config(
            "config must contain at least one [module.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.concurrency == Some(0) {
        return Err(ProvisorError::Config(
            "[config].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.trip_threshold == 0 {
        return Err(ProvisorError::Config(
            "[config].trip_threshold must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.checkpoint.trim().is_empty() {
        return Err(ProvisorError::Config(
            "[config].checkpoint must not be empty".to_string(),
        ));
    }

    if let Some(host) = &cfg.transport.ssh_host {
        if host.trim().is_empty() {
            return Err(ProvisorError::Config(
                "[transport].ssh_host must not be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn module_defs(cfg: &RawConfigFile) -> Result<Vec<ModuleDef>> {
    let mut defs = Vec::with_capacity(cfg.module.len());

    for (id, module) in &cfg.module {
        if module.install.trim().is_empty() {
            return Err(ProvisorError::Config(format!(
                "module '{id}' has an empty `install` command"
            )));
        }

        let timeout = match &module.timeout {
            Some(raw) => Some(parse_duration(raw).map_err(|e| {
                ProvisorError::Config(format!("module '{id}' has an invalid `timeout`: {e}"))
            })?),
            None => None,
        };

        defs.push(ModuleDef {
            id: id.clone(),
            after: module.after.clone(),
            install: module.install.clone(),
            rollback: module.rollback.clone(),
            timeout,
            retries: module.retries,
        });
    }

    Ok(defs)
}
