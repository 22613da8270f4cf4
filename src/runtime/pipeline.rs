//! Pipeline arena holding nodes and the connections between them

use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use tracing::{debug, info};

use super::errors::{GraphError, GraphResult};
use super::location::Location;
use super::node::Node;
use super::ports::{Port, find_port};

/// Index of a node inside its [`Pipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a connection inside a resolved topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

/// Directed edge from an output port to an input port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub emit: NodeId,
    pub emit_port: String,
    pub recv: NodeId,
    pub recv_port: String,
}

/// Static description of a node, captured when it is added
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub class: String,
    pub location: Location,
    pub settings: Value,
    pub ports_in: Vec<Port>,
    pub ports_out: Vec<Port>,
}

struct NodeEntry {
    info: NodeInfo,
    // moved into a computer when the graph starts
    node: Option<Box<dyn Node>>,
}

/// Arena of nodes and connections.
///
/// The receiving node owns a connection; the emitting side only sees it
/// through [`output_connections`](Pipeline::output_connections).
pub struct Pipeline {
    nodes: Vec<NodeEntry>,
    connections: Vec<Connection>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Add a node under a unique name
    pub fn add_node<N: Node + 'static>(
        &mut self,
        name: impl Into<String>,
        location: Location,
        node: N,
    ) -> GraphResult<NodeId> {
        self.add_boxed(name, location, Box::new(node))
    }

    /// Add an already boxed node under a unique name
    pub fn add_boxed(
        &mut self,
        name: impl Into<String>,
        location: Location,
        node: Box<dyn Node>,
    ) -> GraphResult<NodeId> {
        let name = name.into();
        if self.node_id(&name).is_some() {
            return Err(GraphError::DuplicateName(name));
        }

        let id = NodeId(self.nodes.len());
        debug!("Adding node {} '{}' ({}) on {}", id, name, node.class(), location);
        let info = NodeInfo {
            class: node.class().to_string(),
            settings: node.settings(),
            ports_in: node.ports_in(),
            ports_out: node.ports_out(),
            name,
            location,
        };
        self.nodes.push(NodeEntry {
            info,
            node: Some(node),
        });
        Ok(id)
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.info.name == name)
            .map(NodeId)
    }

    pub fn info(&self, id: NodeId) -> GraphResult<&NodeInfo> {
        self.nodes
            .get(id.0)
            .map(|n| &n.info)
            .ok_or_else(|| GraphError::InvalidNode(id.to_string()))
    }

    pub fn name(&self, id: NodeId) -> GraphResult<&str> {
        Ok(&self.info(id)?.name)
    }

    /// Move a node to another location. Only meaningful before the graph starts.
    pub fn set_location(&mut self, id: NodeId, location: Location) -> GraphResult {
        let entry = self
            .nodes
            .get_mut(id.0)
            .ok_or_else(|| GraphError::InvalidNode(id.to_string()))?;
        entry.info.location = location;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connect `emit.emit_port` to `recv.recv_port`
    pub fn add_input(
        &mut self,
        recv: NodeId,
        emit: NodeId,
        emit_port: &str,
        recv_port: &str,
    ) -> GraphResult {
        let recv_info = self.info(recv)?;
        let emit_info = self.info(emit)?;

        let out = find_port(&emit_info.ports_out, emit_port).ok_or_else(|| {
            GraphError::PortNotFound {
                node: emit_info.name.clone(),
                port: emit_port.to_string(),
            }
        })?;
        let inp = find_port(&recv_info.ports_in, recv_port).ok_or_else(|| {
            GraphError::PortNotFound {
                node: recv_info.name.clone(),
                port: recv_port.to_string(),
            }
        })?;

        if !out.can_input_to(inp) {
            return Err(GraphError::IncompatibleType {
                emit_node: emit_info.name.clone(),
                emit_port: emit_port.to_string(),
                emit_type: out.port_type().name().to_string(),
                recv_node: recv_info.name.clone(),
                recv_port: recv_port.to_string(),
                recv_type: inp.port_type().name().to_string(),
            });
        }

        let conn = Connection {
            emit,
            emit_port: emit_port.to_string(),
            recv,
            recv_port: recv_port.to_string(),
        };

        if self.connections.contains(&conn) {
            return Err(GraphError::DuplicateConnection(format!(
                "{}.{} -> {}.{}",
                emit_info.name, emit_port, recv_info.name, recv_port
            )));
        }

        if self
            .connections
            .iter()
            .any(|c| c.recv == recv && c.recv_port == recv_port)
        {
            return Err(GraphError::PortAlreadyConnected {
                node: recv_info.name.clone(),
                port: recv_port.to_string(),
            });
        }

        if emit == recv || self.is_child_of(emit, recv) {
            return Err(GraphError::Cycle(format!(
                "{}.{} -> {}.{}",
                emit_info.name, emit_port, recv_info.name, recv_port
            )));
        }

        info!(
            "Connected {}.{} -> {}.{}",
            emit_info.name, emit_port, recv_info.name, recv_port
        );
        self.connections.push(conn);
        Ok(())
    }

    /// Remove the connections from `emit` into `recv` matching the given ports.
    ///
    /// `None` matches any port. Returns how many connections were removed.
    pub fn remove_input(
        &mut self,
        recv: NodeId,
        emit: NodeId,
        emit_port: Option<&str>,
        recv_port: Option<&str>,
    ) -> usize {
        let before = self.connections.len();
        self.connections.retain(|c| {
            let matches = c.recv == recv
                && c.emit == emit
                && emit_port.is_none_or(|p| c.emit_port == p)
                && recv_port.is_none_or(|p| c.recv_port == p);
            !matches
        });
        let removed = before - self.connections.len();
        if removed > 0 {
            debug!("Removed {} connection(s) {} -> {}", removed, emit, recv);
        }
        removed
    }

    /// Connections feeding `id`
    pub fn input_connections(&self, id: NodeId) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.recv == id).collect()
    }

    /// Connections leaving `id`
    pub fn output_connections(&self, id: NodeId) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.emit == id).collect()
    }

    /// Whether data emitted by `ancestor` reaches `id` along some path
    pub fn is_child_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([ancestor]);
        while let Some(current) = queue.pop_front() {
            for conn in self.output_connections(current) {
                if conn.recv == id {
                    return true;
                }
                if seen.insert(conn.recv) {
                    queue.push_back(conn.recv);
                }
            }
        }
        false
    }

    /// Whether data emitted by `id` reaches `descendant` along some path
    pub fn is_parent_of(&self, id: NodeId, descendant: NodeId) -> bool {
        self.is_child_of(descendant, id)
    }

    /// Every node connected to `start`, following edges both ways, sorted by id
    pub fn discover_graph(&self, start: NodeId) -> GraphResult<Vec<NodeId>> {
        self.info(start)?;
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for conn in &self.connections {
                let next = if conn.emit == current {
                    conn.recv
                } else if conn.recv == current {
                    conn.emit
                } else {
                    continue;
                };
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(seen.into_iter().collect())
    }

    /// Take the node object out of the arena to run it
    pub(crate) fn take_node(&mut self, id: NodeId) -> Option<Box<dyn Node>> {
        self.nodes.get_mut(id.0).and_then(|n| n.node.take())
    }

    /// Whether the node object is still in the arena (not yet started)
    pub fn is_available(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(|n| n.node.is_some())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ports::PortType;

    struct TestSource;
    impl Node for TestSource {
        fn class(&self) -> &str {
            "TestSource"
        }
        fn ports_out(&self) -> Vec<Port> {
            vec![Port::new("out", PortType::integer())]
        }
        fn is_producer(&self) -> bool {
            true
        }
    }

    struct TestProcessor;
    impl Node for TestProcessor {
        fn class(&self) -> &str {
            "TestProcessor"
        }
        fn ports_in(&self) -> Vec<Port> {
            vec![Port::new("in", PortType::number())]
        }
        fn ports_out(&self) -> Vec<Port> {
            vec![
                Port::new("out", PortType::number()),
                Port::new("label", PortType::text()),
            ]
        }
    }

    struct TestSink;
    impl Node for TestSink {
        fn class(&self) -> &str {
            "TestSink"
        }
        fn ports_in(&self) -> Vec<Port> {
            vec![
                Port::new("in", PortType::number()),
                Port::new("extra", PortType::number()).optional(),
            ]
        }
    }

    fn chain() -> (Pipeline, NodeId, NodeId, NodeId) {
        let mut pipeline = Pipeline::new();
        let a = pipeline.add_node("source", Location::Same, TestSource).unwrap();
        let b = pipeline.add_node("processor", Location::Same, TestProcessor).unwrap();
        let c = pipeline.add_node("sink", Location::Same, TestSink).unwrap();
        pipeline.add_input(b, a, "out", "in").unwrap();
        pipeline.add_input(c, b, "out", "in").unwrap();
        (pipeline, a, b, c)
    }

    #[test]
    fn test_single_connection() {
        let mut pipeline = Pipeline::new();
        let a = pipeline.add_node("source", Location::Same, TestSource).unwrap();
        let b = pipeline.add_node("sink", Location::Same, TestSink).unwrap();

        assert!(pipeline.add_input(b, a, "out", "in").is_ok());
        assert_eq!(pipeline.input_connections(b).len(), 1);
        assert_eq!(pipeline.output_connections(a).len(), 1);
    }

    #[test]
    fn test_duplicate_input_connection_rejected() {
        let mut pipeline = Pipeline::new();
        let s1 = pipeline.add_node("source1", Location::Same, TestSource).unwrap();
        let s2 = pipeline.add_node("source2", Location::Same, TestSource).unwrap();
        let sink = pipeline.add_node("sink", Location::Same, TestSink).unwrap();

        pipeline.add_input(sink, s1, "out", "in").unwrap();

        let same = pipeline.add_input(sink, s1, "out", "in");
        assert!(matches!(same, Err(GraphError::DuplicateConnection(_))));

        let other = pipeline.add_input(sink, s2, "out", "in");
        assert!(matches!(other, Err(GraphError::PortAlreadyConnected { .. })));
        assert!(other.unwrap_err().to_string().contains("already connected"));
    }

    #[test]
    fn test_multiple_output_connections_allowed() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_node("source", Location::Same, TestSource).unwrap();
        let sink1 = pipeline.add_node("sink1", Location::Same, TestSink).unwrap();
        let sink2 = pipeline.add_node("sink2", Location::Same, TestSink).unwrap();

        assert!(pipeline.add_input(sink1, source, "out", "in").is_ok());
        assert!(pipeline.add_input(sink2, source, "out", "in").is_ok());
        assert_eq!(pipeline.output_connections(source).len(), 2);
    }

    #[test]
    fn test_connection_to_invalid_node() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_node("source", Location::Same, TestSource).unwrap();

        let result = pipeline.add_input(NodeId(42), source, "out", "in");
        assert!(matches!(result, Err(GraphError::InvalidNode(_))));
    }

    #[test]
    fn test_connection_to_nonexistent_port() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_node("source", Location::Same, TestSource).unwrap();
        let sink = pipeline.add_node("sink", Location::Same, TestSink).unwrap();

        let result = pipeline.add_input(sink, source, "wrong_port", "in");
        assert!(matches!(result, Err(GraphError::PortNotFound { .. })));
    }

    #[test]
    fn test_incompatible_types_rejected() {
        let mut pipeline = Pipeline::new();
        let proc_ = pipeline.add_node("processor", Location::Same, TestProcessor).unwrap();
        let sink = pipeline.add_node("sink", Location::Same, TestSink).unwrap();

        let result = pipeline.add_input(sink, proc_, "label", "in");
        assert!(matches!(result, Err(GraphError::IncompatibleType { .. })));
        assert!(pipeline.connections().is_empty());
    }

    #[test]
    fn test_cycles_rejected() {
        let mut pipeline = Pipeline::new();
        let first = pipeline.add_node("first", Location::Same, TestProcessor).unwrap();
        let second = pipeline.add_node("second", Location::Same, TestProcessor).unwrap();
        let third = pipeline.add_node("third", Location::Same, TestProcessor).unwrap();
        pipeline.add_input(second, first, "out", "in").unwrap();
        pipeline.add_input(third, second, "out", "in").unwrap();

        let back = pipeline.add_input(first, third, "out", "in");
        assert!(matches!(back, Err(GraphError::Cycle(_))));
        let own = pipeline.add_input(first, first, "out", "in");
        assert!(matches!(own, Err(GraphError::Cycle(_))));
        assert_eq!(pipeline.connections().len(), 2);
    }

    #[test]
    fn test_duplicate_node_name_rejected() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.add_node("node1", Location::Same, TestSource).is_ok());
        let result = pipeline.add_node("node1", Location::Same, TestSource);
        assert!(matches!(result, Err(GraphError::DuplicateName(_))));
    }

    #[test]
    fn test_remove_input_updates_relationships() {
        let (mut pipeline, a, b, c) = chain();
        assert!(pipeline.is_child_of(c, a));
        assert!(pipeline.is_parent_of(a, c));
        assert!(!pipeline.is_child_of(a, c));

        // non-matching channel is a no-op
        assert_eq!(pipeline.remove_input(c, b, Some("label"), None), 0);
        assert!(pipeline.is_child_of(c, a));

        assert_eq!(pipeline.remove_input(c, b, None, None), 1);
        assert!(!pipeline.is_child_of(c, a));
        assert!(!pipeline.is_parent_of(b, c));
        assert!(pipeline.is_child_of(b, a));
    }

    #[test]
    fn test_discover_graph_both_directions() {
        let (mut pipeline, a, b, c) = chain();
        // second source feeding the sink's optional port
        let d = pipeline.add_node("other", Location::Same, TestSource).unwrap();
        pipeline.add_input(c, d, "out", "extra").unwrap();
        let lone = pipeline.add_node("lone", Location::Same, TestSource).unwrap();

        let found = pipeline.discover_graph(a).unwrap();
        assert_eq!(found, vec![a, b, c, d]);
        assert!(!found.contains(&lone));

        assert_eq!(pipeline.discover_graph(lone).unwrap(), vec![lone]);
        assert!(pipeline.discover_graph(NodeId(99)).is_err());
    }

    #[test]
    fn test_node_info_snapshot() {
        let (mut pipeline, a, _, _) = chain();
        let info = pipeline.info(a).unwrap();
        assert_eq!(info.name, "source");
        assert_eq!(info.class, "TestSource");
        assert_eq!(info.ports_out.len(), 1);

        pipeline.set_location(a, Location::thread("gen")).unwrap();
        assert_eq!(pipeline.info(a).unwrap().location, Location::thread("gen"));

        assert!(pipeline.is_available(a));
        assert!(pipeline.take_node(a).is_some());
        assert!(!pipeline.is_available(a));
        assert_eq!(pipeline.node_id("source"), Some(a));
    }
}
