//! Backward-reachability culling of client task graphs.
//!
//! A client-submitted graph maps string keys to nodes; computed nodes name
//! the keys they depend on. Before tasks enter the allocator the graph is
//! restricted to the nodes reachable backward from the requested sinks, so
//! the cluster never runs work nobody asked for.

use phloem_ids::ObjectId;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// A node in a client task graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphNode {
    /// A computable node: a function object plus the keys it consumes.
    Computed {
        function_object_id: ObjectId,
        dependencies: Vec<String>,
    },
    /// A literal value already materialized in the object store. Literals
    /// have no predecessors.
    Literal(ObjectId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph node '{key}' depends on missing key '{missing}'")]
    MissingDependency { key: String, missing: String },

    #[error("requested key '{0}' is not in the graph")]
    UnknownKey(String),
}

/// Restrict `graph` to the nodes reachable backward from `sinks`.
///
/// Breadth-first from the sinks; a missing dependency is a fail-fast error
/// rather than a silent prune, because a graph that references work it does
/// not define can never complete.
pub fn cull_graph(
    graph: &HashMap<String, GraphNode>,
    sinks: &[String],
) -> Result<HashMap<String, GraphNode>, GraphError> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    for key in sinks {
        if !graph.contains_key(key) {
            return Err(GraphError::UnknownKey(key.clone()));
        }
        if visited.insert(key.clone()) {
            queue.push_back(key);
        }
    }

    while let Some(key) = queue.pop_front() {
        let Some(GraphNode::Computed { dependencies, .. }) = graph.get(key) else {
            continue;
        };

        for dependency in dependencies {
            if visited.contains(dependency) {
                continue;
            }
            if !graph.contains_key(dependency) {
                return Err(GraphError::MissingDependency {
                    key: key.to_string(),
                    missing: dependency.clone(),
                });
            }
            visited.insert(dependency.clone());
            queue.push_back(dependency);
        }
    }

    Ok(graph
        .iter()
        .filter(|(key, _)| visited.contains(*key))
        .map(|(key, node)| (key.clone(), node.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn computed(deps: &[&str]) -> GraphNode {
        GraphNode::Computed {
            function_object_id: ObjectId::new(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn literal() -> GraphNode {
        GraphNode::Literal(ObjectId::new())
    }

    fn sample_graph() -> HashMap<String, GraphNode> {
        // a -> b -> d, a -> c; e is disconnected
        HashMap::from([
            ("a".to_string(), computed(&["b", "c"])),
            ("b".to_string(), computed(&["d"])),
            ("c".to_string(), literal()),
            ("d".to_string(), literal()),
            ("e".to_string(), computed(&["d"])),
        ])
    }

    #[test]
    fn test_cull_drops_unreachable_nodes() {
        let graph = sample_graph();
        let culled = cull_graph(&graph, &["a".to_string()]).unwrap();

        let keys: HashSet<&str> = culled.keys().map(String::as_str).collect();
        assert_eq!(keys, HashSet::from(["a", "b", "c", "d"]));
    }

    #[test]
    fn test_cull_keeps_requested_literals() {
        let graph = sample_graph();
        let culled = cull_graph(&graph, &["c".to_string()]).unwrap();
        assert_eq!(culled.len(), 1);
        assert!(culled.contains_key("c"));
    }

    #[test]
    fn test_cull_is_a_closure() {
        let graph = sample_graph();
        let sinks = ["a".to_string(), "e".to_string()];

        let once = cull_graph(&graph, &sinks).unwrap();
        let twice = cull_graph(&once, &sinks).unwrap();

        let once_keys: HashSet<&String> = once.keys().collect();
        let twice_keys: HashSet<&String> = twice.keys().collect();
        assert_eq!(once_keys, twice_keys);
    }

    #[test]
    fn test_missing_dependency_fails_fast() {
        let graph = HashMap::from([("a".to_string(), computed(&["ghost"]))]);
        let err = cull_graph(&graph, &["a".to_string()]).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency {
                key: "a".to_string(),
                missing: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_sink_fails_fast() {
        let graph = sample_graph();
        let err = cull_graph(&graph, &["zzz".to_string()]).unwrap_err();
        assert_eq!(err, GraphError::UnknownKey("zzz".to_string()));
    }
}
