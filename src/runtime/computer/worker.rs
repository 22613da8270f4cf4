//! Worker side of a process computer
//!
//! The worker is the same executable started with [`WORKER_ENV`] set. It
//! reads JSON-line commands on stdin and answers with JSON-line replies on
//! stdout; logging goes to stderr. The pipeline arrives as a
//! [`PipelineDoc`], so the worker rebuilds its nodes through the registry
//! and derives the same topology as the graph owner.

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::Computer;
use super::host::{HostEnv, build_hosts, take_hosted};
use super::thread::ThreadComputer;
use crate::runtime::bridge::{PeerDirectory, ProcessLink};
use crate::runtime::config::EngineConfig;
use crate::runtime::errors::{GraphError, GraphResult};
use crate::runtime::node::{DrawFrame, DrawSink};
use crate::runtime::pipeline::Pipeline;
use crate::runtime::registry::NodeRegistry;
use crate::runtime::serializer::PipelineDoc;
use crate::runtime::topology::Topology;
use crate::runtime::watchdog::Watchdog;

/// Environment variable marking a worker process
pub const WORKER_ENV: &str = "LIVEGRAPH_WORKER";

pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Graph owner → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub(crate) enum Command {
    Setup {
        process: String,
        pipeline: PipelineDoc,
        config: EngineConfig,
        draw: bool,
    },
    Start {
        peers: BTreeMap<String, SocketAddr>,
    },
    Stop {
        timeout_ms: u64,
    },
    Close {
        timeout_ms: u64,
    },
}

/// Worker → graph owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub(crate) enum Reply {
    Ready { addr: Option<SocketAddr> },
    Draw { frame: DrawFrame },
    /// Every hosted node finished
    Finished,
    Stopped { clean: bool },
    Failed { message: String },
}

pub(crate) fn write_line<T: Serialize>(writer: &mut impl Write, message: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, message)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Serve commands from stdin until closed. Entry point of worker processes.
pub fn run_worker(registry: &NodeRegistry) -> GraphResult {
    let (replies, rx) = unbounded();
    thread::Builder::new()
        .name("worker replies".to_string())
        .spawn(move || reply_loop(io::stdout().lock(), rx))?;

    // abandoned node threads may still hold reply senders, so the writer is
    // not joined; returning ends the process and every thread with it
    serve(registry, io::stdin().lock(), replies)
}

fn reply_loop(mut out: impl Write, replies: Receiver<Reply>) {
    for reply in replies {
        if let Err(e) = write_line(&mut out, &reply) {
            // the graph owner is gone; nobody is left to answer
            debug!("failed to write reply: {}", e);
            return;
        }
    }
}

/// Answer commands read from `input` on `replies`
pub(crate) fn serve(
    registry: &NodeRegistry,
    input: impl BufRead,
    replies: Sender<Reply>,
) -> GraphResult {
    let mut worker = Worker::new(registry, replies);

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let command = match serde_json::from_str::<Command>(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!("[{}] ignoring malformed command: {}", worker.process, e);
                worker.reply(Reply::Failed {
                    message: format!("malformed command: {}", e),
                });
                continue;
            }
        };

        match command {
            Command::Setup {
                process,
                pipeline,
                config,
                draw,
            } => {
                let reply = match worker.setup(process, &pipeline, config, draw) {
                    Ok(addr) => Reply::Ready { addr },
                    Err(e) => {
                        error!("[{}] setup failed: {}", worker.process, e);
                        Reply::Failed {
                            message: e.to_string(),
                        }
                    }
                };
                worker.reply(reply);
            }
            Command::Start { peers } => {
                if let Err(e) = worker.start(peers) {
                    error!("[{}] start failed: {}", worker.process, e);
                    worker.reply(Reply::Failed {
                        message: e.to_string(),
                    });
                }
            }
            Command::Stop { timeout_ms } => {
                let clean = worker.stop(Duration::from_millis(timeout_ms));
                worker.reply(Reply::Stopped { clean });
            }
            Command::Close { timeout_ms } => {
                worker.close(Duration::from_millis(timeout_ms));
                return Ok(());
            }
        }
    }

    info!("[{}] command stream ended", worker.process);
    let timeout = worker.config.close_timeout();
    worker.close(timeout);
    Ok(())
}

struct Worker<'a> {
    registry: &'a NodeRegistry,
    replies: Sender<Reply>,
    process: String,
    config: EngineConfig,
    hosts: Vec<ThreadComputer>,
    link: Option<ProcessLink>,
    peers: Arc<PeerDirectory>,
    watchdog: Option<Watchdog>,
}

impl<'a> Worker<'a> {
    fn new(registry: &'a NodeRegistry, replies: Sender<Reply>) -> Self {
        Self {
            registry,
            replies,
            process: "worker".to_string(),
            config: EngineConfig::default(),
            hosts: Vec::new(),
            link: None,
            peers: PeerDirectory::new(),
            watchdog: None,
        }
    }

    fn reply(&self, reply: Reply) {
        let _ = self.replies.send(reply);
    }

    fn setup(
        &mut self,
        process: String,
        doc: &PipelineDoc,
        config: EngineConfig,
        draw: bool,
    ) -> GraphResult<Option<SocketAddr>> {
        if !self.hosts.is_empty() {
            return Err(GraphError::Worker(format!("process '{}' is already set up", self.process)));
        }
        self.process = process;
        self.config = config;

        let topology = Topology::from_doc(doc, &self.config.bridges)?;
        let mut pipeline = Pipeline::from_doc(doc, self.registry)?;
        let nodes = take_hosted(&mut pipeline, &topology, &self.process)?;
        if nodes.is_empty() {
            return Err(GraphError::Worker(format!("no node placed in process '{}'", self.process)));
        }

        if topology.needs_link(&self.process) {
            self.link = Some(ProcessLink::bind(self.process.clone())?);
        }

        if let Some(threshold) = self.config.watchdog_threshold() {
            let watchdog = Watchdog::new(threshold);
            watchdog.start_monitoring_thread()?;
            self.watchdog = Some(watchdog);
        }

        let env = HostEnv {
            process_key: self.process.clone(),
            config: self.config.clone(),
            peers: Arc::clone(&self.peers),
            draw: if draw { Some(self.forward_draw()?) } else { None },
            watchdog: self.watchdog.clone(),
        };
        self.hosts = build_hosts(&env, &topology, nodes, self.link.as_ref())?;
        for host in &mut self.hosts {
            host.setup()?;
        }

        info!(
            "[{}] ready with {} thread(s)",
            self.process,
            self.hosts.len()
        );
        Ok(self.link.as_ref().map(ProcessLink::addr))
    }

    /// Draw sink whose frames are relayed to the graph owner
    fn forward_draw(&self) -> io::Result<DrawSink> {
        let (sink, frames) = unbounded::<DrawFrame>();
        let replies = self.replies.clone();
        thread::Builder::new()
            .name("draw relay".to_string())
            .spawn(move || {
                for frame in frames {
                    if replies.send(Reply::Draw { frame }).is_err() {
                        return;
                    }
                }
            })?;
        Ok(sink)
    }

    fn start(&mut self, peers: BTreeMap<String, SocketAddr>) -> GraphResult {
        if !self.peers.set(peers) {
            warn!("[{}] peer directory already set", self.process);
        }
        for host in &mut self.hosts {
            host.start()?;
        }

        let gates: Vec<_> = self.hosts.iter().map(ThreadComputer::finished_gate).collect();
        let replies = self.replies.clone();
        let process = self.process.clone();
        thread::Builder::new()
            .name("worker monitor".to_string())
            .spawn(move || {
                for gate in gates {
                    gate.wait_fired();
                }
                debug!("[{}] every thread finished", process);
                let _ = replies.send(Reply::Finished);
            })?;
        Ok(())
    }

    fn stop(&mut self, timeout: Duration) -> bool {
        for host in &mut self.hosts {
            host.request_stop();
        }
        let deadline = Instant::now() + timeout;
        let mut clean = true;
        for host in &mut self.hosts {
            let left = deadline.saturating_duration_since(Instant::now());
            clean &= host.join(left);
        }
        clean
    }

    fn close(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        for host in &mut self.hosts {
            host.close(deadline.saturating_duration_since(Instant::now()));
        }
        if let Some(mut link) = self.link.take() {
            link.shutdown();
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
        self.hosts.clear();
        info!("[{}] worker closed", self.process);
    }
}
