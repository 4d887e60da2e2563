// src/dag/mod.rs

//! Module dependency graph.
//!
//! - [`graph`] holds the validated, acyclic graph and computes ready sets.
//! - [`module`] defines module definitions and the dispatch view of a module.

pub mod graph;
pub mod module;

pub use graph::ModuleGraph;
pub use module::{ModuleDef, ScheduledModule};
