//! DAG utilities: dependency graph, cycle detection and level grouping.
//!
//! The containers are BTree-based so iteration is lexicographic by node
//! name, which fixes the scheduling tie-break and makes executions
//! reproducible.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::WorkflowError;
use crate::workflow::Workflow;

/// node name -> set of direct upstream node names. Every node appears as a
/// key; sources map to the empty set.
pub type DependencyGraph = BTreeMap<String, BTreeSet<String>>;

/// Derive the dependency graph from the workflow's reverse link index.
pub fn build_dependency_graph(workflow: &Workflow) -> DependencyGraph {
  let mut graph = DependencyGraph::new();
  for (name, _) in workflow.nodes() {
    graph.entry(name.clone()).or_default();
  }
  for (target, ports) in workflow.links_by_target() {
    let upstream = graph.entry(target.clone()).or_default();
    for refs in ports.values() {
      for link in refs {
        upstream.insert(link.source_node.clone());
      }
    }
  }
  graph
}

/// Find all cycles via DFS coloring. A non-empty result is fatal for
/// execution.
pub fn detect_cycles(graph: &DependencyGraph) -> Vec<Vec<String>> {
  #[derive(Clone, Copy, PartialEq)]
  enum Color {
    White,
    Gray,
    Black,
  }

  // Walk downstream edges so reported cycles read in data-flow order.
  let mut downstream: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
  for name in graph.keys() {
    downstream.entry(name.as_str()).or_default();
  }
  for (node, upstream) in graph {
    for dep in upstream {
      downstream.entry(dep.as_str()).or_default().push(node.as_str());
    }
  }

  let mut color: BTreeMap<&str, Color> =
    graph.keys().map(|name| (name.as_str(), Color::White)).collect();
  let mut cycles: Vec<Vec<String>> = Vec::new();

  fn dfs<'a>(
    node: &'a str,
    downstream: &BTreeMap<&'a str, Vec<&'a str>>,
    color: &mut BTreeMap<&'a str, Color>,
    stack: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<String>>,
  ) {
    color.insert(node, Color::Gray);
    stack.push(node);

    if let Some(next) = downstream.get(node) {
      for &neighbor in next {
        match color.get(neighbor).copied() {
          Some(Color::Gray) => {
            // Back edge: the cycle is the stack suffix from `neighbor`.
            if let Some(start) = stack.iter().position(|&n| n == neighbor) {
              cycles.push(stack[start..].iter().map(|n| n.to_string()).collect());
            }
          }
          Some(Color::White) => dfs(neighbor, downstream, color, stack, cycles),
          _ => {}
        }
      }
    }

    stack.pop();
    color.insert(node, Color::Black);
  }

  let names: Vec<&str> = graph.keys().map(|name| name.as_str()).collect();
  for name in names {
    if color.get(name).copied() == Some(Color::White) {
      let mut stack = Vec::new();
      dfs(name, &downstream, &mut color, &mut stack, &mut cycles);
    }
  }
  cycles
}

/// Group nodes into execution levels (Kahn's algorithm by depth). Nodes
/// within one level are mutually independent; levels are emitted in
/// dependency order and each level is sorted by name.
pub fn topological_levels(graph: &DependencyGraph) -> Result<Vec<Vec<String>>, WorkflowError> {
  let mut remaining: BTreeMap<&str, BTreeSet<&str>> = graph
    .iter()
    .map(|(node, upstream)| {
      (
        node.as_str(),
        upstream.iter().map(|dep| dep.as_str()).collect(),
      )
    })
    .collect();

  let mut levels: Vec<Vec<String>> = Vec::new();
  while !remaining.is_empty() {
    // BTreeMap iteration gives the lexicographic tie-break.
    let ready: Vec<&str> = remaining
      .iter()
      .filter(|(_, upstream)| upstream.is_empty())
      .map(|(node, _)| *node)
      .collect();

    if ready.is_empty() {
      return Err(WorkflowError::Cyclic {
        nodes: remaining.keys().map(|name| name.to_string()).collect(),
      });
    }

    for node in &ready {
      remaining.remove(node);
    }
    for upstream in remaining.values_mut() {
      for node in &ready {
        upstream.remove(node);
      }
    }
    levels.push(ready.iter().map(|name| name.to_string()).collect());
  }
  Ok(levels)
}

/// Filter a level to the nodes with no dependency on other members of the
/// same level. Under a correct level grouping this is the level itself;
/// kept as a guard for incremental scheduling.
pub fn independent_nodes(graph: &DependencyGraph, level: &[String]) -> Vec<String> {
  level
    .iter()
    .filter(|node| {
      graph
        .get(*node)
        .map(|upstream| level.iter().all(|other| other == *node || !upstream.contains(other)))
        .unwrap_or(true)
    })
    .cloned()
    .collect()
}
