// tests/module_graph.rs

use std::collections::BTreeMap;

use provisor::dag::{ModuleDef, ModuleGraph};
use provisor::types::{ModuleId, ModuleStatus, SkipReason};

/// base -> {net, compiler}; compiler -> app; net -> app; tools (independent)
fn diamond() -> ModuleGraph {
    ModuleGraph::build(&[
        ModuleDef::new("base", "echo base"),
        ModuleDef::new("net", "echo net").after("base"),
        ModuleDef::new("compiler", "echo compiler").after("base"),
        ModuleDef::new("app", "echo app").after("net").after("compiler"),
        ModuleDef::new("tools", "echo tools"),
    ])
    .unwrap()
}

fn all_pending(graph: &ModuleGraph) -> BTreeMap<ModuleId, ModuleStatus> {
    graph
        .topological_order()
        .iter()
        .map(|id| (id.clone(), ModuleStatus::Pending))
        .collect()
}

fn position(order: &[ModuleId], id: &str) -> usize {
    order.iter().position(|m| m == id).unwrap()
}

#[test]
fn test_topological_order_puts_dependencies_first() {
    let graph = diamond();
    let order = graph.topological_order();

    assert_eq!(order.len(), 5);
    assert!(position(order, "base") < position(order, "net"));
    assert!(position(order, "base") < position(order, "compiler"));
    assert!(position(order, "net") < position(order, "app"));
    assert!(position(order, "compiler") < position(order, "app"));
}

#[test]
fn test_ready_set_only_contains_modules_with_satisfied_dependencies() {
    let graph = diamond();
    let mut statuses = all_pending(&graph);

    let mut ready = graph.ready_set(&statuses);
    ready.sort();
    assert_eq!(ready, vec!["base".to_string(), "tools".to_string()]);

    statuses.insert("base".into(), ModuleStatus::Succeeded);
    statuses.insert("tools".into(), ModuleStatus::Running);
    let mut ready = graph.ready_set(&statuses);
    ready.sort();
    assert_eq!(ready, vec!["compiler".to_string(), "net".to_string()]);

    // A restored module satisfies dependents like a fresh success.
    statuses.insert("net".into(), ModuleStatus::Skipped(SkipReason::AlreadySatisfied));
    statuses.insert("compiler".into(), ModuleStatus::Failed);
    assert!(graph.ready_set(&statuses).is_empty());

    statuses.insert("compiler".into(), ModuleStatus::Succeeded);
    assert_eq!(graph.ready_set(&statuses), vec!["app".to_string()]);
}

#[test]
fn test_descendants_cover_the_whole_downstream_branch() {
    let graph = diamond();

    let mut below_base = graph.descendants_of("base");
    below_base.sort();
    assert_eq!(below_base, vec!["app", "compiler", "net"]);

    assert_eq!(graph.descendants_of("net"), vec!["app"]);
    assert!(graph.descendants_of("tools").is_empty());
    assert!(graph.descendants_of("app").is_empty());
}

#[test]
fn test_dependencies_and_dependents_are_mirrored() {
    let graph = diamond();

    assert_eq!(graph.dependencies_of("app"), ["net", "compiler"]);
    let mut dependents = graph.dependents_of("base").to_vec();
    dependents.sort();
    assert_eq!(dependents, vec!["compiler", "net"]);
    assert!(graph.dependencies_of("missing").is_empty());
}

#[test]
fn test_duplicate_module_ids_are_rejected() {
    let result = ModuleGraph::build(&[
        ModuleDef::new("a", "one"),
        ModuleDef::new("a", "two"),
    ]);
    assert!(result.is_err());
}
