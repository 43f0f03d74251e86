//! Associated-policy dependency graph
//!
//! Authoring-time check over a whole policy set: every associated id must
//! resolve, and the graph must be acyclic. The evaluator performs its own
//! per-path check at runtime, so this is an early warning rather than a
//! precondition.

use std::collections::HashMap;
use thiserror::Error;

use crate::model::Policy;
use crate::types::PolicyId;

/// Graph-related errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Circular dependency, reported as `a -> b -> a`
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// An associated policy id does not resolve to a known policy
    #[error("Unknown associated policy: {0}")]
    UnknownPolicy(PolicyId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Directed graph from a policy to its associated policies
#[derive(Debug, Clone, Default)]
pub struct PolicyGraph {
    /// Insertion order, so reports are deterministic
    order: Vec<PolicyId>,
    edges: HashMap<PolicyId, Vec<PolicyId>>,
}

impl PolicyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_policies<'a, I>(policies: I) -> Self
    where
        I: IntoIterator<Item = &'a Policy>,
    {
        let mut graph = Self::new();
        for policy in policies {
            graph.add_policy(policy);
        }
        graph
    }

    pub fn add_policy(&mut self, policy: &Policy) {
        if !self.edges.contains_key(&policy.id) {
            self.order.push(policy.id.clone());
        }
        self.edges
            .insert(policy.id.clone(), policy.associated_policies.clone());
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ensure every associated id is a node of the graph
    pub fn check_references(&self) -> Result<(), GraphError> {
        for id in &self.order {
            for child in &self.edges[id] {
                if !self.edges.contains_key(child) {
                    return Err(GraphError::UnknownPolicy(child.clone()));
                }
            }
        }
        Ok(())
    }

    /// Three-color DFS; fails on the first back edge found
    pub fn detect_cycle(&self) -> Result<(), GraphError> {
        let mut marks: HashMap<&str, Mark> = self
            .order
            .iter()
            .map(|id| (id.as_str(), Mark::Unvisited))
            .collect();

        for start in &self.order {
            if marks.get(start.as_str()) == Some(&Mark::Unvisited) {
                let mut path = Vec::new();
                self.visit(start, &mut marks, &mut path)?;
            }
        }

        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), GraphError> {
        match marks.get(node) {
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(node);
                return Err(GraphError::CircularDependency(cycle.join(" -> ")));
            }
            Some(Mark::Done) => return Ok(()),
            // Dangling references are reported by check_references
            None => return Ok(()),
            Some(Mark::Unvisited) => {}
        }

        marks.insert(node, Mark::Visiting);
        path.push(node);

        if let Some(children) = self.edges.get(node) {
            for child in children {
                self.visit(child, marks, path)?;
            }
        }

        path.pop();
        marks.insert(node, Mark::Done);
        Ok(())
    }

    /// Run both checks
    pub fn validate(&self) -> Result<(), GraphError> {
        self.check_references()?;
        self.detect_cycle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(id: &str, children: &[&str]) -> Policy {
        children
            .iter()
            .fold(Policy::new(id, "aggregate", "rs"), |p, c| p.with_associated(*c))
    }

    #[test]
    fn test_acyclic_graph() {
        let policies = vec![
            policy("a", &["b", "c"]),
            policy("b", &["c"]),
            policy("c", &[]),
        ];
        let graph = PolicyGraph::from_policies(&policies);

        assert_eq!(graph.len(), 3);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_self_cycle() {
        let policies = vec![policy("a", &["a"])];
        let graph = PolicyGraph::from_policies(&policies);

        assert_eq!(
            graph.detect_cycle(),
            Err(GraphError::CircularDependency("a -> a".to_string()))
        );
    }

    #[test]
    fn test_transitive_cycle_path() {
        let policies = vec![
            policy("a", &["b"]),
            policy("b", &["c"]),
            policy("c", &["a"]),
        ];
        let graph = PolicyGraph::from_policies(&policies);

        assert_eq!(
            graph.detect_cycle(),
            Err(GraphError::CircularDependency("a -> b -> c -> a".to_string()))
        );
    }

    #[test]
    fn test_dangling_reference() {
        let policies = vec![policy("a", &["ghost"])];
        let graph = PolicyGraph::from_policies(&policies);

        assert_eq!(
            graph.check_references(),
            Err(GraphError::UnknownPolicy("ghost".to_string()))
        );
        // Cycle detection alone ignores the dangling edge
        assert!(graph.detect_cycle().is_ok());
    }
}
