// src/exec/classify.rs

//! Line classification: an ordered table of (category, matchers) pairs.
//!
//! Evaluation is top-down and the first matching category wins. The table is
//! plain data, so tests can classify synthetic lines without any process.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};

use crate::errors::{ProvisorError, Result};
use crate::types::ErrorCategory;

const MISSING_DEPENDENCY: &[&str] = &[
    r"command not found",
    r"no such file or directory",
    r"unable to locate package",
    r"no matching distribution",
    r"package .* (is )?not (found|available)",
    r"cannot find module",
    r"missing dependenc",
];

const PERMISSION: &[&str] = &[
    r"permission denied",
    r"operation not permitted",
    r"\beacces\b",
    r"are you root",
    r"must be run as root",
    r"sudo: .*password",
];

const NETWORK: &[&str] = &[
    r"could not resolve host",
    r"temporary failure in name resolution",
    r"network is unreachable",
    r"connection (refused|timed out|reset)",
    r"failed to connect",
    r"could not connect",
    r"ssl.*(error|handshake)",
];

const RUNTIME: &[&str] = &[
    r"\berror\b",
    r"\bfatal\b",
    r"\bfailed\b",
    r"exception",
    r"panicked",
    r"segmentation fault",
];

/// Ordered classification table.
#[derive(Debug, Clone)]
pub struct PatternTable {
    entries: Vec<(ErrorCategory, Vec<Regex>)>,
}

impl PatternTable {
    /// Build a table from already-compiled matchers, keeping the given order.
    pub fn new(entries: Vec<(ErrorCategory, Vec<Regex>)>) -> Self {
        Self { entries }
    }

    /// Compile a table from pattern strings (case-insensitive).
    pub fn from_patterns<S: AsRef<str>>(entries: &[(ErrorCategory, Vec<S>)]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(entries.len());
        for (category, patterns) in entries {
            compiled.push((*category, compile_all(*category, patterns)?));
        }
        Ok(Self::new(compiled))
    }

    /// The built-in table: missing_dependency, permission, network, runtime.
    pub fn builtin() -> Result<Self> {
        Self::with_overrides(&BTreeMap::new())
    }

    /// The built-in table with some categories' patterns replaced.
    ///
    /// Keys are category names as written in `[patterns]`. Priority order is
    /// fixed regardless of which categories are overridden.
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut by_category: BTreeMap<ErrorCategory, Vec<String>> = BTreeMap::new();

        for (key, patterns) in overrides {
            let category: ErrorCategory = key.parse().map_err(ProvisorError::Config)?;
            if !ErrorCategory::CLASSIFIABLE.contains(&category) {
                return Err(ProvisorError::Config(format!(
                    "[patterns].{key}: category '{category}' is not matched against output"
                )));
            }
            by_category.insert(category, patterns.clone());
        }

        let mut entries = Vec::with_capacity(ErrorCategory::CLASSIFIABLE.len());
        for category in ErrorCategory::CLASSIFIABLE {
            let patterns: Vec<String> = match by_category.remove(&category) {
                Some(custom) => custom,
                None => builtin_patterns(category)
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            };
            entries.push((category, patterns));
        }

        Self::from_patterns(&entries)
    }

    /// First category whose matchers hit `line`, if any.
    pub fn classify(&self, line: &str) -> Option<ErrorCategory> {
        self.entries
            .iter()
            .find(|(_, matchers)| matchers.iter().any(|re| re.is_match(line)))
            .map(|(category, _)| *category)
    }

    /// Categories in evaluation order.
    pub fn categories(&self) -> impl Iterator<Item = ErrorCategory> + '_ {
        self.entries.iter().map(|(category, _)| *category)
    }
}

fn builtin_patterns(category: ErrorCategory) -> &'static [&'static str] {
    match category {
        ErrorCategory::MissingDependency => MISSING_DEPENDENCY,
        ErrorCategory::Permission => PERMISSION,
        ErrorCategory::Network => NETWORK,
        ErrorCategory::Runtime => RUNTIME,
        ErrorCategory::Timeout | ErrorCategory::Unclassified => &[],
    }
}

fn compile_all<S: AsRef<str>>(category: ErrorCategory, patterns: &[S]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p.as_ref())
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    ProvisorError::Config(format!(
                        "invalid pattern for category '{category}': {e}"
                    ))
                })
        })
        .collect()
}
