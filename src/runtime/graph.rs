//! Graph orchestration
//!
//! A [`Graph`] discovers every node connected to its start node, resolves
//! their placement into a [`Topology`] and runs one computer per location:
//! thread computers for locations of this process, one process computer per
//! worker process. Every computer is set up before any is started so that
//! the listening addresses of process links can be exchanged first.

use crossbeam_channel::{Receiver, unbounded};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::bridge::{PeerDirectory, ProcessLink};
use super::computer::{Computer, HostEnv, ProcessComputer, build_hosts, take_hosted};
use super::config::EngineConfig;
use super::errors::{GraphError, GraphResult};
use super::location::ROOT_PROCESS;
use super::node::{DrawFrame, DrawSink};
use super::pipeline::{NodeId, Pipeline};
use super::registry::NodeRegistry;
use super::serializer::PipelineDoc;
use super::topology::Topology;
use super::watchdog::Watchdog;

pub struct Graph {
    pipeline: Pipeline,
    start: NodeId,
    config: EngineConfig,
    registry: Option<NodeRegistry>,
    draw: Option<(DrawSink, Receiver<DrawFrame>)>,
    computers: Vec<Box<dyn Computer>>,
    link: Option<ProcessLink>,
    watchdog: Option<Watchdog>,
}

impl Graph {
    /// Graph over everything connected to `start`
    pub fn new(pipeline: Pipeline, start: NodeId) -> Self {
        Self {
            pipeline,
            start,
            config: EngineConfig::default(),
            registry: None,
            draw: None,
            computers: Vec::new(),
            link: None,
            watchdog: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry used to check classes placed in worker processes
    pub fn with_registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Frames passed to `Context::emit_draw`, from every location.
    ///
    /// Only frames emitted after a call made before `start_all` are delivered.
    pub fn draw_frames(&mut self) -> Receiver<DrawFrame> {
        let (_, frames) = self.draw.get_or_insert_with(unbounded);
        frames.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.computers.is_empty()
    }

    /// Labels of the running computers, in start order
    pub fn computers(&self) -> Vec<&str> {
        self.computers.iter().map(|c| c.label()).collect()
    }

    /// Resolve placement, set up every computer, then start them all
    pub fn start_all(&mut self) -> GraphResult {
        if self.is_running() {
            return Err(GraphError::InvalidState {
                computer: "graph".to_string(),
                operation: "start",
                state: "running".to_string(),
            });
        }

        let ids = self.pipeline.discover_graph(self.start)?;
        if let Some(&taken) = ids.iter().find(|&&id| !self.pipeline.is_available(id)) {
            let name = self.pipeline.name(taken)?.to_string();
            return Err(GraphError::InvalidNode(format!("{} (already started)", name)));
        }

        let doc = self.pipeline.to_doc_subset(&ids);
        let topology = Topology::from_doc(&doc, &self.config.bridges)?;
        let processes = topology.processes();
        if !processes.is_empty() {
            self.check_registry(&topology)?;
        }

        info!(
            "Starting {} node(s) on {} location(s)",
            topology.len(),
            topology.locations().len()
        );
        if let Err(e) = self.launch(doc, &topology, processes) {
            self.close_all(self.config.close_timeout());
            return Err(e);
        }
        info!("Started {} computer(s)", self.computers.len());
        Ok(())
    }

    fn launch(
        &mut self,
        doc: PipelineDoc,
        topology: &Topology,
        processes: BTreeSet<String>,
    ) -> GraphResult {
        if let Some(threshold) = self.config.watchdog_threshold() {
            let watchdog = Watchdog::new(threshold);
            watchdog.start_monitoring_thread()?;
            self.watchdog = Some(watchdog);
        }
        if topology.needs_link(ROOT_PROCESS) {
            self.link = Some(ProcessLink::bind("root")?);
        }

        let peers = PeerDirectory::new();
        let draw = self.draw.as_ref().map(|(sink, _)| sink.clone());
        let env = HostEnv {
            process_key: ROOT_PROCESS.to_string(),
            config: self.config.clone(),
            peers: peers.clone(),
            draw: draw.clone(),
            watchdog: self.watchdog.clone(),
        };

        let nodes = take_hosted(&mut self.pipeline, topology, ROOT_PROCESS)?;
        let hosts = build_hosts(&env, topology, nodes, self.link.as_ref())?;
        self.computers = hosts
            .into_iter()
            .map(|host| Box::new(host) as Box<dyn Computer>)
            .collect();
        for process in processes {
            self.computers.push(Box::new(ProcessComputer::new(
                process,
                doc.clone(),
                &self.config,
                peers.clone(),
                draw.clone(),
            )));
        }

        for computer in &mut self.computers {
            if let Err(e) = computer.setup() {
                error!("[{}] setup failed: {}", computer.label(), e);
                return Err(e);
            }
        }

        let mut addresses = BTreeMap::new();
        if let Some(link) = &self.link {
            addresses.insert(ROOT_PROCESS.to_string(), link.addr());
        }
        addresses.extend(self.computers.iter().filter_map(|c| c.endpoint()));
        debug!("Peer directory: {:?}", addresses);
        peers.set(addresses);

        for computer in &mut self.computers {
            if let Err(e) = computer.start() {
                error!("[{}] failed to start: {}", computer.label(), e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn check_registry(&self, topology: &Topology) -> GraphResult {
        for (_, placement) in topology.placements() {
            if placement.location.is_root() {
                continue;
            }
            let registry = self
                .registry
                .as_ref()
                .ok_or_else(|| GraphError::RegistryRequired(placement.name.clone()))?;
            if !registry.contains(&placement.class) {
                return Err(GraphError::UnknownClass(placement.class.clone()));
            }
        }
        Ok(())
    }

    /// Ask every computer to stop, wait up to `timeout`, then close them all.
    ///
    /// Returns whether everything stopped within `timeout`.
    pub fn stop_all(&mut self, timeout: Duration) -> bool {
        if !self.is_running() {
            return true;
        }
        info!("Stopping {} computer(s)", self.computers.len());
        for computer in &mut self.computers {
            computer.request_stop();
        }

        let clean = self.join(timeout);
        if !clean {
            for computer in self.computers.iter().filter(|c| !c.is_finished()) {
                warn!("[{}] did not stop within {:?}", computer.label(), timeout);
            }
        }
        self.close_all(self.config.close_timeout());
        clean
    }

    /// Wait up to `timeout` for every computer to finish on its own
    pub fn join(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut finished = true;
        for computer in &mut self.computers {
            finished &= computer.join(deadline.saturating_duration_since(Instant::now()));
        }
        finished
    }

    /// Forced shutdown of every computer, each bounded by `timeout`
    pub fn close_all(&mut self, timeout: Duration) {
        for computer in &mut self.computers {
            computer.close(timeout);
        }
        self.computers.clear();

        if let Some(mut link) = self.link.take() {
            link.shutdown();
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
        debug!("All computers closed");
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if self.is_running() {
            self.close_all(self.config.close_timeout());
        }
    }
}
