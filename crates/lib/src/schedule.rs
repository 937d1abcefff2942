//! Build ordering.
//!
//! The resolved specs form a graph with an edge from every dependency to
//! its dependent. The build order is Kahn's algorithm over that graph with
//! ties broken by discovery order, so the same recipes always yield the
//! same sequence.

use std::collections::{HashMap, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::spec::SpecArena;

/// Errors that can occur while ordering builds.
#[derive(Debug, Error)]
pub enum ScheduleError {
  #[error("dependency cycle detected between: {}", .remaining.join(", "))]
  Cycle { remaining: Vec<String> },
}

/// Dependency graph over resolved specs.
pub struct DependencyGraph {
  graph: DiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
  /// Build the graph. Requirements naming packages outside the table are ignored.
  pub fn from_specs(specs: &SpecArena) -> Self {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for name in specs.names() {
      let idx = graph.add_node(name.to_string());
      nodes.insert(name.to_string(), idx);
    }

    for spec in specs.iter() {
      let to = nodes[&spec.package];
      for dep in &spec.requires {
        if let Some(&from) = nodes.get(dep) {
          graph.update_edge(from, to, ());
        }
      }
    }

    Self { graph, nodes }
  }

  /// Every package in an order where dependencies come before dependents.
  pub fn build_order(&self) -> Result<Vec<String>, ScheduleError> {
    let mut pending: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();

    // Node indices follow discovery order.
    let mut ready: VecDeque<NodeIndex> = self.graph.node_indices().filter(|idx| pending[idx] == 0).collect();
    let mut order = Vec::with_capacity(self.graph.node_count());

    while let Some(idx) = ready.pop_front() {
      order.push(self.graph[idx].clone());

      let mut dependents: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
      dependents.sort();
      for dependent in dependents {
        if let Some(count) = pending.get_mut(&dependent) {
          *count -= 1;
          if *count == 0 {
            ready.push_back(dependent);
          }
        }
      }
    }

    if order.len() < self.graph.node_count() {
      let remaining = self
        .graph
        .node_indices()
        .filter(|idx| pending[idx] > 0)
        .map(|idx| self.graph[idx].clone())
        .collect();
      return Err(ScheduleError::Cycle { remaining });
    }

    Ok(order)
  }

  /// Packages that directly depend on `package`, in discovery order.
  pub fn dependents(&self, package: &str) -> Vec<&str> {
    let Some(&idx) = self.nodes.get(package) else {
      return Vec::new();
    };
    let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
    found.sort();
    found.into_iter().map(|i| self.graph[i].as_str()).collect()
  }
}

/// Order `specs` so that every dependency precedes its dependents.
pub fn build_order(specs: &SpecArena) -> Result<Vec<String>, ScheduleError> {
  DependencyGraph::from_specs(specs).build_order()
}
