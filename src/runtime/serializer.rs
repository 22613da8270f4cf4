//! Saving and loading pipelines
//!
//! A saved pipeline maps a class-qualified identifier (`"name [Class]"`) to
//! the node's class, settings, location and input connections. Loading runs
//! in two passes: every node is built through a [`NodeRegistry`] first, then
//! the connections are re-created by port key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use super::errors::{GraphError, GraphResult};
use super::location::Location;
use super::pipeline::{NodeId, Pipeline};
use super::registry::NodeRegistry;

/// One input connection, seen from the receiving node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDoc {
    /// Identifier (or plain name) of the emitting node
    pub emit_node: String,
    pub emit_port: String,
    pub recv_port: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDoc {
    pub class: String,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub compute_on: Location,
    #[serde(default)]
    pub inputs: Vec<InputDoc>,
}

/// Saved pipeline keyed by node identifier
pub type PipelineDoc = BTreeMap<String, NodeDoc>;

/// Class-qualified identifier of a node
pub fn identifier(name: &str, class: &str) -> String {
    format!("{} [{}]", name, class)
}

/// Node name part of an identifier
pub fn name_of(identifier: &str) -> &str {
    match identifier.rsplit_once(" [") {
        Some((name, class)) if class.ends_with(']') => name,
        _ => identifier,
    }
}

/// Resolve an `emit_node` reference (identifier or plain name) within `doc`
pub fn resolve_reference<'a>(doc: &'a PipelineDoc, reference: &str) -> Option<&'a str> {
    if let Some((key, _)) = doc.get_key_value(reference) {
        return Some(key);
    }
    doc.keys()
        .find(|key| name_of(key) == reference)
        .map(String::as_str)
}

impl Pipeline {
    /// Describe every node of the pipeline
    pub fn to_doc(&self) -> PipelineDoc {
        let ids: Vec<NodeId> = self.node_ids().collect();
        self.to_doc_subset(&ids)
    }

    /// Describe the given nodes and the connections among them
    pub fn to_doc_subset(&self, ids: &[NodeId]) -> PipelineDoc {
        let mut doc = PipelineDoc::new();
        for &id in ids {
            let Ok(info) = self.info(id) else {
                continue;
            };
            let inputs = self
                .input_connections(id)
                .into_iter()
                .filter(|c| ids.contains(&c.emit))
                .filter_map(|c| {
                    let emit = self.info(c.emit).ok()?;
                    Some(InputDoc {
                        emit_node: identifier(&emit.name, &emit.class),
                        emit_port: c.emit_port.clone(),
                        recv_port: c.recv_port.clone(),
                    })
                })
                .collect();
            doc.insert(
                identifier(&info.name, &info.class),
                NodeDoc {
                    class: info.class.clone(),
                    settings: info.settings.clone(),
                    compute_on: info.location.clone(),
                    inputs,
                },
            );
        }
        doc
    }

    /// Rebuild a pipeline from its description
    pub fn from_doc(doc: &PipelineDoc, registry: &NodeRegistry) -> GraphResult<Pipeline> {
        let mut pipeline = Pipeline::new();
        let mut ids: HashMap<&str, NodeId> = HashMap::new();

        for (key, node_doc) in doc {
            let node = registry.construct(&node_doc.class, &node_doc.settings)?;
            let id = pipeline.add_boxed(name_of(key), node_doc.compute_on.clone(), node)?;
            ids.insert(key.as_str(), id);
        }

        for (key, node_doc) in doc {
            let recv = ids[key.as_str()];
            for input in &node_doc.inputs {
                let emit = resolve_reference(doc, &input.emit_node)
                    .and_then(|k| ids.get(k).copied())
                    .ok_or_else(|| GraphError::InvalidNode(input.emit_node.clone()))?;
                pipeline.add_input(recv, emit, &input.emit_port, &input.recv_port)?;
            }
        }

        info!(
            "Loaded pipeline with {} nodes and {} connections",
            pipeline.len(),
            pipeline.connections().len()
        );
        Ok(pipeline)
    }

    pub fn to_json(&self) -> GraphResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_doc())?)
    }

    pub fn from_json(json: &str, registry: &NodeRegistry) -> GraphResult<Pipeline> {
        let doc: PipelineDoc = serde_json::from_str(json)?;
        Self::from_doc(&doc, registry)
    }

    /// Write the pipeline as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> GraphResult {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a pipeline saved with [`save`](Pipeline::save)
    pub fn load(path: impl AsRef<Path>, registry: &NodeRegistry) -> GraphResult<Pipeline> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json, registry)
    }
}
