//! Service dependency graph
//!
//! The graph is keyed by service name. Each node records both the services it
//! waits for (`dependencies`) and the services waiting for it (`dependents`),
//! so a traversal can run in either direction without rebuilding anything.
//! Back-references are names, not pointers.

use super::config::ServiceConfig;
use super::walker::Direction;
use crate::error::{ConvoyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// What the graph needs to know about a service
///
/// Everything else about the service is opaque to the graph and the walker;
/// it is handed through untouched to the per-service operation.
pub trait ServiceDescriptor {
    /// Unique, non-empty service name
    fn name(&self) -> &str;

    /// Names of services this one requires, in declaration order
    fn dependency_names(&self) -> Vec<String>;
}

impl ServiceDescriptor for ServiceConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency_names(&self) -> Vec<String> {
        self.dependencies().into_iter().map(|d| d.name).collect()
    }
}

/// A service reduced to its name and dependency list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BareService {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl BareService {
    pub fn new(name: impl Into<String>, depends_on: &[&str]) -> Self {
        Self {
            name: name.into(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl ServiceDescriptor for BareService {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency_names(&self) -> Vec<String> {
        self.depends_on.clone()
    }
}

/// Graph vertex
#[derive(Debug, Clone)]
pub struct Node<S> {
    service: S,
    dependencies: Vec<String>,
    dependents: Vec<String>,
}

impl<S> Node<S> {
    fn new(service: S) -> Self {
        Self {
            service,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// The service payload
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Names this node waits for
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Names waiting for this node
    pub fn dependents(&self) -> &[String] {
        &self.dependents
    }
}

/// Dependency graph keyed by service name
#[derive(Debug, Clone)]
pub struct Graph<S> {
    nodes: HashMap<String, Node<S>>,
    /// Insertion order, for deterministic iteration
    order: Vec<String>,
}

impl<S> Graph<S> {
    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by service name
    pub fn get(&self, name: &str) -> Option<&Node<S>> {
        self.nodes.get(name)
    }

    /// True if a service with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Service names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node<S>)> {
        self.order
            .iter()
            .filter_map(|name| self.nodes.get(name).map(|node| (name.as_str(), node)))
    }

    /// Nodes with no dependencies
    pub fn roots(&self) -> Vec<&str> {
        self.nodes()
            .filter(|(_, node)| node.dependencies.is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    /// Nodes nothing depends on
    pub fn leaves(&self) -> Vec<&str> {
        self.nodes()
            .filter(|(_, node)| node.dependents.is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    /// Forward adjacency (service -> dependencies), suitable for serialization
    pub fn adjacency(&self) -> BTreeMap<String, Vec<String>> {
        self.nodes()
            .map(|(name, node)| (name.to_string(), node.dependencies.clone()))
            .collect()
    }

    /// Group nodes by longest path from the starting set of `direction`.
    ///
    /// Nodes that can never become ready (cycles and anything behind them)
    /// appear in no level.
    pub fn levels(&self, direction: Direction) -> Vec<Vec<String>> {
        let mut pending: HashMap<&str, usize> = self
            .nodes()
            .map(|(name, node)| (name, direction.prereqs(node).len()))
            .collect();
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        for (name, count) in self.nodes().map(|(n, _)| (n, pending[n])) {
            if count == 0 {
                depth.insert(name, 0);
                queue.push_back(name);
            }
        }

        while let Some(name) = queue.pop_front() {
            let level = depth[name];
            for next in direction.successors(&self.nodes[name]) {
                let next = next.as_str();
                let entry = depth.entry(next).or_insert(0);
                *entry = (*entry).max(level + 1);
                if let Some(count) = pending.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        let mut levels: Vec<Vec<String>> = Vec::new();
        for (name, _) in self.nodes() {
            if pending[name] != 0 {
                continue;
            }
            let level = depth[name];
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(name.to_string());
        }
        levels
    }

    /// Find one dependency cycle, returned as a closed path (`a -> b -> a`)
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Visited,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();

        for start in self.names() {
            if marks.contains_key(start) {
                continue;
            }
            // Iterative DFS: (node, index of next dependency to explore)
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::Visiting);

            while let Some((name, idx)) = stack.pop() {
                let deps = &self.nodes[name].dependencies;
                if idx >= deps.len() {
                    marks.insert(name, Mark::Visited);
                    continue;
                }
                stack.push((name, idx + 1));

                let dep = deps[idx].as_str();
                match marks.get(dep) {
                    Some(Mark::Visiting) => {
                        let pos = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[pos..].iter().map(|(n, _)| n.to_string()).collect();
                        path.push(dep.to_string());
                        return Some(path);
                    }
                    Some(Mark::Visited) => {}
                    None => {
                        marks.insert(dep, Mark::Visiting);
                        stack.push((dep, 0));
                    }
                }
            }
        }

        None
    }
}

impl Graph<BareService> {
    /// Rebuild a graph from an exported adjacency map
    pub fn from_adjacency(adjacency: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        build_graph(adjacency.iter().map(|(name, deps)| BareService {
            name: name.clone(),
            depends_on: deps.clone(),
        }))
    }
}

/// Builds a validated [`Graph`] from a service list
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    lenient: bool,
}

impl GraphBuilder {
    /// A strict builder: unknown dependencies are an error
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop unknown dependency names with a warning instead of failing
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Build the graph
    pub fn build<S, I>(&self, services: I) -> Result<Graph<S>>
    where
        S: ServiceDescriptor,
        I: IntoIterator<Item = S>,
    {
        let mut nodes: HashMap<String, Node<S>> = HashMap::new();
        let mut order = Vec::new();
        let mut declared: Vec<(String, Vec<String>)> = Vec::new();

        for service in services {
            let name = service.name().to_string();
            if name.is_empty() {
                return Err(ConvoyError::InvalidGraph(
                    "service name must not be empty".to_string(),
                ));
            }
            if nodes.contains_key(&name) {
                return Err(ConvoyError::InvalidGraph(format!(
                    "duplicate service '{}'",
                    name
                )));
            }
            declared.push((name.clone(), service.dependency_names()));
            order.push(name.clone());
            nodes.insert(name, Node::new(service));
        }

        for (name, deps) in declared {
            let mut seen = HashSet::new();
            for dep in deps {
                if !seen.insert(dep.clone()) {
                    continue;
                }
                if !nodes.contains_key(&dep) {
                    if self.lenient {
                        tracing::warn!(
                            "Service '{}' depends on unknown service '{}', ignoring",
                            name,
                            dep
                        );
                        continue;
                    }
                    return Err(ConvoyError::InvalidGraph(format!(
                        "unknown dependency '{}' of service '{}'",
                        dep, name
                    )));
                }
                if let Some(node) = nodes.get_mut(&dep) {
                    node.dependents.push(name.clone());
                }
                if let Some(node) = nodes.get_mut(&name) {
                    node.dependencies.push(dep);
                }
            }
        }

        Ok(Graph { nodes, order })
    }
}

/// Build a graph, rejecting unknown dependencies
pub fn build_graph<S, I>(services: I) -> Result<Graph<S>>
where
    S: ServiceDescriptor,
    I: IntoIterator<Item = S>,
{
    GraphBuilder::new().build(services)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Graph<BareService> {
        build_graph(vec![
            BareService::new("a", &[]),
            BareService::new("b", &["a"]),
            BareService::new("c", &["a"]),
            BareService::new("d", &["b", "c"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_adjacency_is_bidirectional() {
        let graph = diamond();

        for (name, node) in graph.nodes() {
            for dep in node.dependencies() {
                assert!(graph.get(dep).unwrap().dependents().iter().any(|d| d == name));
            }
            for dependent in node.dependents() {
                assert!(graph
                    .get(dependent)
                    .unwrap()
                    .dependencies()
                    .iter()
                    .any(|d| d == name));
            }
        }
        assert_eq!(graph.get("d").unwrap().dependencies(), ["b", "c"]);
        assert_eq!(graph.get("a").unwrap().dependents(), ["b", "c"]);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = build_graph(vec![BareService::new("web", &["db"])]).unwrap_err();
        match err {
            ConvoyError::InvalidGraph(msg) => assert!(msg.starts_with("unknown dependency")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_dependency_dropped_when_lenient() {
        let graph = GraphBuilder::new()
            .lenient(true)
            .build(vec![BareService::new("web", &["db"])])
            .unwrap();
        assert!(graph.get("web").unwrap().dependencies().is_empty());
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let err = build_graph(vec![BareService::new("a", &[]), BareService::new("a", &[])])
            .unwrap_err();
        match err {
            ConvoyError::InvalidGraph(msg) => assert!(msg.starts_with("duplicate service")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_repeated_dependency_collapsed() {
        let graph = build_graph(vec![
            BareService::new("a", &[]),
            BareService::new("b", &["a", "a"]),
        ])
        .unwrap();
        assert_eq!(graph.get("b").unwrap().dependencies(), ["a"]);
        assert_eq!(graph.get("a").unwrap().dependents(), ["b"]);
    }

    #[test]
    fn test_roots_and_leaves() {
        let graph = diamond();
        assert_eq!(graph.roots(), vec!["a"]);
        assert_eq!(graph.leaves(), vec!["d"]);
    }

    #[test]
    fn test_levels() {
        let graph = diamond();
        assert_eq!(
            graph.levels(Direction::Forward),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
        assert_eq!(
            graph.levels(Direction::Backward),
            vec![vec!["d"], vec!["b", "c"], vec!["a"]]
        );
    }

    #[test]
    fn test_levels_use_longest_path() {
        let graph = build_graph(vec![
            BareService::new("a", &[]),
            BareService::new("b", &["a"]),
            BareService::new("c", &["a", "b"]),
        ])
        .unwrap();
        assert_eq!(
            graph.levels(Direction::Forward),
            vec![vec!["a"], vec!["b"], vec!["c"]]
        );
    }

    #[test]
    fn test_find_cycle() {
        assert!(diamond().find_cycle().is_none());

        let graph = build_graph(vec![
            BareService::new("a", &["b"]),
            BareService::new("b", &["c"]),
            BareService::new("c", &["a"]),
            BareService::new("d", &[]),
        ])
        .unwrap();
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(graph.levels(Direction::Forward).concat() == vec!["d"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = build_graph(vec![BareService::new("a", &["a"])]).unwrap();
        assert_eq!(graph.find_cycle(), Some(vec!["a".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_adjacency_round_trip() {
        let graph = diamond();
        let json = serde_json::to_string(&graph.adjacency()).unwrap();
        let parsed: BTreeMap<String, Vec<String>> = serde_json::from_str(&json).unwrap();
        let rebuilt = Graph::from_adjacency(&parsed).unwrap();

        assert_eq!(rebuilt.adjacency(), graph.adjacency());
        for (name, node) in graph.nodes() {
            let mut expected = node.dependents().to_vec();
            let mut actual = rebuilt.get(name).unwrap().dependents().to_vec();
            expected.sort();
            actual.sort();
            assert_eq!(actual, expected);
        }
    }
}
