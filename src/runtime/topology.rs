//! Resolved placement of a pipeline
//!
//! Built from a [`PipelineDoc`] so that the graph-owning process and every
//! worker process derive the same node numbering, connection numbering and
//! bridge kinds from the same document.

use std::collections::BTreeSet;
use tracing::debug;

use super::bridge::{BridgeKind, process::wire_key, resolve_bridge};
use super::errors::{GraphError, GraphResult};
use super::location::Location;
use super::pipeline::{Connection, ConnectionId, NodeId};
use super::serializer::{PipelineDoc, name_of, resolve_reference};

#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub name: String,
    pub class: String,
    pub location: Location,
}

/// A connection with its resolved bridge
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: ConnectionId,
    pub conn: Connection,
    pub kind: BridgeKind,
    /// Name-based key, identical in every process
    pub key: String,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<Placement>,
    edges: Vec<Edge>,
}

impl Topology {
    /// Resolve every connection of `doc` using the enabled bridge `kinds`
    pub fn from_doc(doc: &PipelineDoc, kinds: &[BridgeKind]) -> GraphResult<Topology> {
        let keys: Vec<&String> = doc.keys().collect();
        let index_of = |key: &str| keys.iter().position(|k| k.as_str() == key).map(NodeId);

        let nodes: Vec<Placement> = doc
            .iter()
            .map(|(key, node)| Placement {
                name: name_of(key).to_string(),
                class: node.class.clone(),
                location: node.compute_on.clone(),
            })
            .collect();

        let mut edges = Vec::new();
        for (recv_index, node) in doc.values().enumerate() {
            let recv = NodeId(recv_index);
            for input in &node.inputs {
                let emit = resolve_reference(doc, &input.emit_node)
                    .and_then(index_of)
                    .ok_or_else(|| GraphError::InvalidNode(input.emit_node.clone()))?;

                let from = &nodes[emit.0];
                let to = &nodes[recv.0];
                let kind = resolve_bridge(kinds, &from.location, &to.location)?;
                let key = wire_key(&from.name, &input.emit_port, &to.name, &input.recv_port);
                debug!("{} via {} bridge", key, kind);

                edges.push(Edge {
                    id: ConnectionId(edges.len()),
                    conn: Connection {
                        emit,
                        emit_port: input.emit_port.clone(),
                        recv,
                        recv_port: input.recv_port.clone(),
                    },
                    kind,
                    key,
                });
            }
        }

        Ok(Topology { nodes, edges })
    }

    pub fn placement(&self, id: NodeId) -> Option<&Placement> {
        self.nodes.get(id.0)
    }

    pub fn placements(&self) -> impl Iterator<Item = (NodeId, &Placement)> {
        self.nodes.iter().enumerate().map(|(i, p)| (NodeId(i), p))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct locations, in order
    pub fn locations(&self) -> BTreeSet<Location> {
        self.nodes.iter().map(|p| p.location.clone()).collect()
    }

    /// Nodes placed at `location`
    pub fn nodes_at(&self, location: &Location) -> Vec<NodeId> {
        self.placements()
            .filter(|(_, p)| &p.location == location)
            .map(|(id, _)| id)
            .collect()
    }

    /// Nodes hosted by the OS process `process_key`
    pub fn nodes_in_process(&self, process_key: &str) -> Vec<NodeId> {
        self.placements()
            .filter(|(_, p)| p.location.process_key() == process_key)
            .map(|(id, _)| id)
            .collect()
    }

    /// Worker processes needed, by process key
    pub fn processes(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter(|p| !p.location.is_root())
            .map(|p| p.location.process_key().to_string())
            .collect()
    }

    /// Whether `process_key` receives data over a process bridge
    pub fn needs_link(&self, process_key: &str) -> bool {
        self.edges.iter().any(|e| {
            e.kind == BridgeKind::Process
                && self.nodes[e.conn.recv.0].location.process_key() == process_key
        })
    }

    pub fn inputs_of(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.conn.recv == id)
    }

    pub fn outputs_of(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.conn.emit == id)
    }

    pub fn location_of(&self, id: NodeId) -> Option<&Location> {
        self.placement(id).map(|p| &p.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bridge::BRIDGE_KINDS;
    use crate::runtime::location::ROOT_PROCESS;
    use serde_json::json;

    fn doc() -> PipelineDoc {
        serde_json::from_value(json!({
            "a [Counter]": { "class": "Counter" },
            "b [Scale]": {
                "class": "Scale",
                "compute_on": "process:dsp",
                "inputs": [{ "emit_node": "a [Counter]", "emit_port": "value", "recv_port": "in" }]
            },
            "c [Print]": {
                "class": "Print",
                "inputs": [{ "emit_node": "b [Scale]", "emit_port": "out", "recv_port": "in" }]
            },
            "d [Print]": {
                "class": "Print",
                "compute_on": "thread:log",
                "inputs": [{ "emit_node": "a", "emit_port": "value", "recv_port": "in" }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_resolves_kinds_and_keys() {
        let topology = Topology::from_doc(&doc(), &BRIDGE_KINDS).unwrap();
        assert_eq!(topology.len(), 4);

        let kinds: Vec<_> = topology.edges().iter().map(|e| (e.key.as_str(), e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("a:value->b:in", BridgeKind::Process),
                ("b:out->c:in", BridgeKind::Process),
                ("a:value->d:in", BridgeKind::Thread),
            ]
        );
        assert_eq!(topology.edges()[2].id, ConnectionId(2));
    }

    #[test]
    fn test_process_queries() {
        let topology = Topology::from_doc(&doc(), &BRIDGE_KINDS).unwrap();
        assert_eq!(topology.processes(), BTreeSet::from(["dsp".to_string()]));
        assert!(topology.needs_link("dsp"));
        assert!(topology.needs_link(ROOT_PROCESS));
        assert_eq!(topology.nodes_in_process("dsp"), vec![NodeId(1)]);
        assert_eq!(topology.nodes_in_process(ROOT_PROCESS), vec![NodeId(0), NodeId(2), NodeId(3)]);
        assert_eq!(topology.nodes_at(&Location::Same), vec![NodeId(0), NodeId(2)]);
        assert_eq!(topology.locations().len(), 3);
        assert_eq!(topology.inputs_of(NodeId(2)).count(), 1);
        assert_eq!(topology.outputs_of(NodeId(0)).count(), 2);
    }

    #[test]
    fn test_no_bridge_available() {
        let err = Topology::from_doc(&doc(), &[BridgeKind::Local, BridgeKind::Thread]).unwrap_err();
        assert!(matches!(err, GraphError::NoBridgeAvailable { .. }));
    }
}
