// src/dag/graph.rs

use std::collections::{BTreeMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::module::ModuleDef;
use crate::errors::{ProvisorError, Result};
use crate::types::{ModuleId, ModuleStatus};

/// Internal node structure: the definition plus its immediate dependents.
#[derive(Debug, Clone)]
struct DagNode {
    def: ModuleDef,
    dependents: Vec<ModuleId>,
}

/// Validated dependency graph over modules.
///
/// Construction through [`ModuleGraph::build`] guarantees that every
/// dependency resolves to a known module and that there are no cycles, so
/// the rest of the crate never has to re-check either.
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    nodes: BTreeMap<ModuleId, DagNode>,
    /// Dependencies-first ordering of all module ids.
    order: Vec<ModuleId>,
}

impl ModuleGraph {
    /// Build and validate a graph from module definitions.
    pub fn build(defs: &[ModuleDef]) -> Result<Self> {
        let mut nodes: BTreeMap<ModuleId, DagNode> = BTreeMap::new();

        for def in defs {
            if nodes.contains_key(&def.id) {
                return Err(ProvisorError::Config(format!(
                    "module '{}' is defined more than once",
                    def.id
                )));
            }
            nodes.insert(
                def.id.clone(),
                DagNode {
                    def: def.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        for def in defs {
            for dep in &def.after {
                if dep == &def.id {
                    return Err(ProvisorError::CyclicDependency(format!(
                        "module '{}' depends on itself",
                        def.id
                    )));
                }
                match nodes.get_mut(dep) {
                    Some(dep_node) => dep_node.dependents.push(def.id.clone()),
                    None => {
                        return Err(ProvisorError::UnknownDependency {
                            module: def.id.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        let order = topological_order(&nodes)?;

        Ok(Self { nodes, order })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&ModuleDef> {
        self.nodes.get(id).map(|n| &n.def)
    }

    /// Module ids, dependencies first.
    pub fn topological_order(&self) -> &[ModuleId] {
        &self.order
    }

    /// Module definitions, dependencies first.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDef> {
        self.order.iter().filter_map(|id| self.get(id))
    }

    /// Immediate dependencies of a module (its `after` list).
    pub fn dependencies_of(&self, id: &str) -> &[ModuleId] {
        self.nodes
            .get(id)
            .map(|n| n.def.after.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a module.
    pub fn dependents_of(&self, id: &str) -> &[ModuleId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// All transitive dependents of a module, nearest first.
    pub fn descendants_of(&self, id: &str) -> Vec<ModuleId> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.dependents_of(id).iter().map(String::as_str).collect();
        let mut out = Vec::new();

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            out.push(name.to_string());
            queue.extend(self.dependents_of(name).iter().map(String::as_str));
        }

        out
    }

    /// Modules that are `Pending` and whose dependencies all satisfy
    /// dependents (`Succeeded` or already satisfied from a checkpoint).
    ///
    /// Returned in topological order so dispatch is deterministic.
    pub fn ready_set(&self, statuses: &BTreeMap<ModuleId, ModuleStatus>) -> Vec<ModuleId> {
        self.order
            .iter()
            .filter(|id| matches!(statuses.get(id.as_str()), Some(ModuleStatus::Pending)))
            .filter(|id| {
                self.dependencies_of(id).iter().all(|dep| {
                    statuses
                        .get(dep)
                        .map(ModuleStatus::satisfies_dependents)
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect()
    }
}

/// Topologically sort the graph, reporting a cycle as a configuration error.
///
/// Edge direction: dependency -> dependent.
fn topological_order(nodes: &BTreeMap<ModuleId, DagNode>) -> Result<Vec<ModuleId>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in nodes.keys() {
        graph.add_node(name.as_str());
    }

    for (name, node) in nodes {
        for dep in &node.def.after {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(ProvisorError::CyclicDependency(format!(
            "cycle detected in module graph involving module '{}'",
            cycle.node_id()
        ))),
    }
}
