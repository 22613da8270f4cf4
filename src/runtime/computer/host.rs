//! Wiring of the thread computers of one OS process
//!
//! Nodes are grouped by location. Every edge touching a hosted node gets the
//! bridge halves its kind calls for: same-thread edges are left to the
//! computer thread, thread edges share a tick buffer, and process edges are
//! routed through the process link (receiving side) or a socket writer
//! (emitting side).

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::thread::{HostPlan, PendingInput, PendingOutput, PlannedNode, ThreadComputer};
use crate::runtime::bridge::{BridgeKind, PeerDirectory, ProcessLink, ProcessSender, ThreadSender};
use crate::runtime::config::EngineConfig;
use crate::runtime::errors::{GraphError, GraphResult};
use crate::runtime::node::{DrawSink, Node};
use crate::runtime::pipeline::{NodeId, Pipeline};
use crate::runtime::topology::Topology;
use crate::runtime::watchdog::Watchdog;

/// What every computer of one OS process shares
#[derive(Clone)]
pub struct HostEnv {
    /// Process key of this OS process, `""` for the graph owner
    pub process_key: String,
    pub config: EngineConfig,
    pub peers: Arc<PeerDirectory>,
    pub draw: Option<DrawSink>,
    pub watchdog: Option<Watchdog>,
}

/// Take the node objects placed in `process_key` out of `pipeline`, keyed by topology id
pub fn take_hosted(
    pipeline: &mut Pipeline,
    topology: &Topology,
    process_key: &str,
) -> GraphResult<BTreeMap<NodeId, Box<dyn Node>>> {
    let mut nodes = BTreeMap::new();
    for id in topology.nodes_in_process(process_key) {
        let Some(placement) = topology.placement(id) else {
            continue;
        };
        let node = pipeline
            .node_id(&placement.name)
            .and_then(|local| pipeline.take_node(local))
            .ok_or_else(|| GraphError::InvalidNode(placement.name.clone()))?;
        nodes.insert(id, node);
    }
    Ok(nodes)
}

/// Build one thread computer per location hosted by `env.process_key`
pub fn build_hosts(
    env: &HostEnv,
    topology: &Topology,
    mut nodes: BTreeMap<NodeId, Box<dyn Node>>,
    link: Option<&ProcessLink>,
) -> GraphResult<Vec<ThreadComputer>> {
    let mut plans: Vec<HostPlan> = Vec::new();
    for location in topology.locations() {
        if location.process_key() != env.process_key {
            continue;
        }
        let mut plan = HostPlan::new(location.to_string());
        for id in topology.nodes_at(&location) {
            let (Some(node), Some(placement)) = (nodes.remove(&id), topology.placement(id)) else {
                return Err(GraphError::InvalidNode(format!("{}", id)));
            };
            plan.nodes.push(PlannedNode {
                id,
                name: placement.name.clone(),
                node,
            });
        }
        plans.push(plan);
    }

    let plan_of = |plans: &[HostPlan], id: NodeId| plans.iter().position(|p| p.hosts(id));

    for edge in topology.edges() {
        let emit = plan_of(&plans, edge.conn.emit);
        let recv = plan_of(&plans, edge.conn.recv);
        if emit.is_none() && recv.is_none() {
            continue;
        }

        match edge.kind {
            BridgeKind::Local => {
                if let Some(i) = recv {
                    plans[i].local_edges.push(edge.clone());
                }
            }
            BridgeKind::Thread => {
                let (Some(e), Some(r)) = (emit, recv) else {
                    return Err(GraphError::Worker(format!(
                        "thread bridge {} leaves process '{}'",
                        edge.key, env.process_key
                    )));
                };
                let (tx, rx) =
                    ThreadSender::pair(edge.key.clone(), edge.conn.recv, edge.id, plans[r].inbox());
                plans[r].inputs.push(PendingInput {
                    node: edge.conn.recv,
                    port: edge.conn.recv_port.clone(),
                    conn: edge.id,
                    receiver: Box::new(rx),
                });
                plans[e].outputs.push(PendingOutput {
                    node: edge.conn.emit,
                    port: edge.conn.emit_port.clone(),
                    conn: edge.id,
                    sender: Box::new(tx),
                });
            }
            BridgeKind::Process => {
                if let Some(r) = recv {
                    let link = link.ok_or_else(|| {
                        GraphError::Worker(format!("no process link to receive {}", edge.key))
                    })?;
                    let rx = link.register(
                        edge.key.clone(),
                        edge.conn.recv,
                        edge.id,
                        plans[r].inbox(),
                    );
                    plans[r].inputs.push(PendingInput {
                        node: edge.conn.recv,
                        port: edge.conn.recv_port.clone(),
                        conn: edge.id,
                        receiver: Box::new(rx),
                    });
                }
                if let Some(e) = emit {
                    let target = topology
                        .location_of(edge.conn.recv)
                        .map(|l| l.process_key().to_string())
                        .ok_or_else(|| GraphError::InvalidNode(format!("{}", edge.conn.recv)))?;
                    let tx = ProcessSender::spawn(
                        edge.key.clone(),
                        target,
                        Arc::clone(&env.peers),
                        env.config.setup_timeout(),
                    )?;
                    plans[e].outputs.push(PendingOutput {
                        node: edge.conn.emit,
                        port: edge.conn.emit_port.clone(),
                        conn: edge.id,
                        sender: Box::new(tx),
                    });
                }
            }
        }
    }

    Ok(plans
        .into_iter()
        .map(|plan| {
            debug!(
                "[{}] hosts {} node(s), {} local edge(s), {} input(s), {} output(s)",
                plan.label,
                plan.nodes.len(),
                plan.local_edges.len(),
                plan.inputs.len(),
                plan.outputs.len()
            );
            ThreadComputer::new(plan, &env.config, env.draw.clone(), env.watchdog.clone())
        })
        .collect())
}
