//! Thread computer: one OS thread running one event loop
//!
//! All nodes sharing a location are driven by the same loop:
//!
//! 1. Producers run one cycle per iteration (`run()` → [`Step`])
//! 2. Bridge events are drained from the thread-local queue and the inbox;
//!    each data event asks the receiving node's [`DataStorage`] whether its
//!    tick is complete and, if so, calls `process()`
//! 3. With nothing to do, the loop blocks on the inbox and the lifecycle
//!    gates, bounded by the idle poll interval
//!
//! Same-thread bridges are created inside the thread; everything crossing
//! the thread boundary is wired by the host builder beforehand.

use crossbeam_channel::{Receiver, Sender, bounded, never, select, unbounded};
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::{Computer, ComputerState, call_result, invalid_state};
use crate::runtime::bridge::{
    BridgeReceiver, BridgeSender, Event, LocalBridge, LocalQueue, OutputLink,
};
use crate::runtime::clock::Clock;
use crate::runtime::config::EngineConfig;
use crate::runtime::errors::{GraphError, GraphResult};
use crate::runtime::node::{Context, DrawSink, Node, Step};
use crate::runtime::pipeline::{ConnectionId, NodeId};
use crate::runtime::ports::Port;
use crate::runtime::signal::{Gate, Lifecycle};
use crate::runtime::storage::DataStorage;
use crate::runtime::topology::Edge;
use crate::runtime::watchdog::{OperationGuard, Watchdog, WatchdogHandle};

/// Events handled per loop iteration before gates are rechecked
const DRAIN_BATCH: usize = 1024;

pub struct PlannedNode {
    pub id: NodeId,
    pub name: String,
    pub node: Box<dyn Node>,
}

pub struct PendingInput {
    pub node: NodeId,
    pub port: String,
    pub conn: ConnectionId,
    pub receiver: Box<dyn BridgeReceiver + Send>,
}

pub struct PendingOutput {
    pub node: NodeId,
    pub port: String,
    pub conn: ConnectionId,
    pub sender: Box<dyn BridgeSender + Send>,
}

/// Everything one thread computer hosts, assembled before its thread exists
pub struct HostPlan {
    pub label: String,
    pub nodes: Vec<PlannedNode>,
    /// Connections between two nodes of this plan
    pub local_edges: Vec<Edge>,
    pub inputs: Vec<PendingInput>,
    pub outputs: Vec<PendingOutput>,
    inbox_tx: Sender<Event>,
    inbox_rx: Receiver<Event>,
}

impl HostPlan {
    pub fn new(label: impl Into<String>) -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        Self {
            label: label.into(),
            nodes: Vec::new(),
            local_edges: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            inbox_tx,
            inbox_rx,
        }
    }

    /// Sender feeding this computer's event loop
    pub fn inbox(&self) -> Sender<Event> {
        self.inbox_tx.clone()
    }

    pub fn hosts(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }
}

struct FireOnDrop(Gate);

impl Drop for FireOnDrop {
    fn drop(&mut self) {
        self.0.fire();
    }
}

pub struct ThreadComputer {
    label: String,
    state: ComputerState,
    lifecycle: Lifecycle,
    finished: Gate,
    plan: Option<HostPlan>,
    handle: Option<JoinHandle<()>>,
    setup_timeout: Duration,
    idle_poll: Duration,
    check_values: bool,
    draw: Option<DrawSink>,
    watchdog: Option<Watchdog>,
}

impl ThreadComputer {
    pub fn new(
        plan: HostPlan,
        config: &EngineConfig,
        draw: Option<DrawSink>,
        watchdog: Option<Watchdog>,
    ) -> Self {
        Self {
            label: plan.label.clone(),
            state: ComputerState::Created,
            lifecycle: Lifecycle::new(),
            finished: Gate::new(),
            plan: Some(plan),
            handle: None,
            setup_timeout: config.setup_timeout(),
            idle_poll: config.idle_poll(),
            check_values: config.check_values,
            draw,
            watchdog,
        }
    }

    /// Gate fired once the event loop has exited
    pub fn finished_gate(&self) -> Gate {
        self.finished.clone()
    }
}

impl Computer for ThreadComputer {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> ComputerState {
        self.state
    }

    fn setup(&mut self) -> GraphResult {
        let Some(plan) = self.plan.take() else {
            return Err(invalid_state(&self.label, "set up", self.state));
        };

        let (ready_tx, ready_rx) = bounded(1);
        let lifecycle = self.lifecycle.clone();
        let finished = FireOnDrop(self.finished.clone());
        let draw = self.draw.take();
        let watchdog = self.watchdog.clone();
        let idle_poll = self.idle_poll;
        let check_values = self.check_values;

        let handle = thread::Builder::new()
            .name(self.label.clone())
            .spawn(move || {
                let _finished = finished;
                let mut event_loop =
                    EventLoop::materialize(plan, draw, watchdog.as_ref(), idle_poll, check_values);
                let _ = ready_tx.send(());
                event_loop.run(&lifecycle);
            })?;
        self.handle = Some(handle);

        if ready_rx.recv_timeout(self.setup_timeout).is_err() {
            self.lifecycle.close.fire();
            return Err(GraphError::Timeout {
                computer: self.label.clone(),
                operation: "setup",
            });
        }

        debug!("[{}] ready", self.label);
        self.state = ComputerState::Ready;
        Ok(())
    }

    fn start(&mut self) -> GraphResult {
        if self.state != ComputerState::Ready {
            return Err(invalid_state(&self.label, "start", self.state));
        }
        self.lifecycle.start.fire();
        self.state = ComputerState::Started;
        Ok(())
    }

    fn request_stop(&mut self) {
        if matches!(self.state, ComputerState::Ready | ComputerState::Started) {
            debug!("[{}] stop requested", self.label);
            self.lifecycle.stop.fire();
            self.state = ComputerState::Stopping;
        }
    }

    fn close(&mut self, timeout: Duration) {
        if self.state == ComputerState::Closed {
            return;
        }
        self.lifecycle.close.fire();

        if let Some(handle) = self.handle.take() {
            if self.finished.wait(timeout) {
                if handle.join().is_err() {
                    warn!("[{}] thread panicked", self.label);
                }
            } else {
                // threads cannot be killed; the handle is dropped and the thread detached
                warn!(
                    "[{}] still busy after {:?}, abandoning thread",
                    self.label, timeout
                );
            }
        }

        self.plan = None;
        self.state = ComputerState::Closed;
        info!("[{}] closed", self.label);
    }

    fn join(&mut self, timeout: Duration) -> bool {
        if self.handle.is_none() {
            return self.finished.is_fired() || self.state == ComputerState::Created;
        }
        self.finished.wait(timeout)
    }

    fn is_finished(&self) -> bool {
        self.finished.is_fired()
    }
}

impl Drop for ThreadComputer {
    fn drop(&mut self) {
        self.lifecycle.close.fire();
    }
}

/// A node as driven by the event loop
struct Hosted {
    id: NodeId,
    name: String,
    node: Box<dyn Node>,
    ports_out: Vec<Port>,
    outputs: Vec<OutputLink>,
    storage: DataStorage,
    clock: Clock,
    producer: bool,
    running: bool,
    /// Last tick handed to `process`, 0 before the first
    processed: u64,
    /// Ports that carried data for `processed` when it was handed over
    processed_ports: BTreeSet<String>,
    run_call: Option<WatchdogHandle>,
    process_call: Option<WatchdogHandle>,
}

impl Hosted {
    fn new(planned: PlannedNode, watchdog: Option<&Watchdog>) -> Self {
        let PlannedNode { id, name, node } = planned;
        Self {
            id,
            storage: DataStorage::new(name.clone(), node.ports_in()),
            clock: Clock::new(name.clone()),
            ports_out: node.ports_out(),
            outputs: Vec::new(),
            producer: node.is_producer(),
            running: true,
            processed: 0,
            processed_ports: BTreeSet::new(),
            run_call: watchdog.map(|w| w.register(&name, "run")),
            process_call: watchdog.map(|w| w.register(&name, "process")),
            name,
            node,
        }
    }

    /// Stop the node and close its outputs. Idempotent.
    fn finish(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.node.on_stop();
        for link in &self.outputs {
            link.sender.close();
        }
        debug!("[{}] finished at tick {}", self.name, self.clock.ctr());
    }

    /// One producer cycle
    fn step(&mut self, draw: Option<&DrawSink>, check_values: bool) {
        let ctr = self.clock.tick();
        let mut ctx = Context::new(
            &self.name,
            ctr,
            &self.ports_out,
            &self.outputs,
            draw,
            check_values,
        );
        let node = &mut self.node;
        let result = {
            let _guard = self.run_call.as_ref().map(OperationGuard::new);
            panic::catch_unwind(AssertUnwindSafe(|| node.run(&mut ctx)))
        };

        match call_result(result) {
            Ok(Step::Continue) => {}
            Ok(Step::Done) => {
                info!("[{}] done after {} tick(s)", self.name, ctr);
                self.finish();
            }
            Err(e) => {
                error!("[{}] run failed at tick {}: {}", self.name, ctr, e);
                self.finish();
            }
        }
    }

    /// Process tick `ctr` if the node considers its inputs sufficient.
    ///
    /// The current tick is offered again whenever another input delivers
    /// for it; older ticks are ignored.
    fn process(&mut self, ctr: u64, draw: Option<&DrawSink>, check_values: bool) {
        if !self.running || ctr < self.processed {
            return;
        }
        let inputs = self.storage.collect(ctr);
        let present: BTreeSet<String> = inputs
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(port, _)| port.to_string())
            .collect();
        if ctr == self.processed && present.is_subset(&self.processed_ports) {
            trace!("[{}] tick {} has nothing new", self.name, ctr);
            return;
        }
        if !self.node.should_process(&inputs) {
            trace!("[{}] tick {} incomplete", self.name, ctr);
            return;
        }

        self.processed = ctr;
        self.processed_ports = present;
        self.clock.sync(ctr);
        for (port, value) in inputs.iter() {
            if !value.is_null() {
                self.clock.register(port, ctr);
            }
        }

        let mut ctx = Context::new(
            &self.name,
            ctr,
            &self.ports_out,
            &self.outputs,
            draw,
            check_values,
        );
        let node = &mut self.node;
        let result = {
            let _guard = self.process_call.as_ref().map(OperationGuard::new);
            panic::catch_unwind(AssertUnwindSafe(|| node.process(&inputs, &mut ctx)))
        };

        if let Err(e) = call_result(result) {
            // no emission this tick; the node stays up
            error!("[{}] process failed at tick {}: {}", self.name, ctr, e);
        }
        self.storage.discard_before(ctr);
    }

    /// One input connection closed; the node stops once all of them have
    fn input_closed(&mut self, conn: ConnectionId) {
        if !self.storage.mark_closed(conn) {
            return;
        }
        let open = self.storage.open_count();
        debug!("[{}] input closed, {} still open", self.name, open);
        if open == 0 {
            self.finish();
        }
    }
}

struct EventLoop {
    label: String,
    nodes: Vec<Hosted>,
    index: HashMap<NodeId, usize>,
    queue: LocalQueue,
    inbox: Receiver<Event>,
    draw: Option<DrawSink>,
    idle_poll: Duration,
    check_values: bool,
}

impl EventLoop {
    /// Build the thread-side state, including same-thread bridges
    fn materialize(
        plan: HostPlan,
        draw: Option<DrawSink>,
        watchdog: Option<&Watchdog>,
        idle_poll: Duration,
        check_values: bool,
    ) -> Self {
        let HostPlan {
            label,
            nodes,
            local_edges,
            inputs,
            outputs,
            inbox_rx,
            ..
        } = plan;

        let mut nodes: Vec<Hosted> = nodes
            .into_iter()
            .map(|planned| Hosted::new(planned, watchdog))
            .collect();
        let index: HashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, h)| (h.id, i)).collect();
        let queue = LocalQueue::default();

        for edge in local_edges {
            let (tx, rx) =
                LocalBridge::pair(edge.key.clone(), edge.conn.recv, edge.id, queue.clone());
            if let Some(&i) = index.get(&edge.conn.recv) {
                nodes[i]
                    .storage
                    .attach(edge.conn.recv_port.clone(), edge.id, Box::new(rx));
            }
            if let Some(&i) = index.get(&edge.conn.emit) {
                nodes[i].outputs.push(OutputLink {
                    port: edge.conn.emit_port.clone(),
                    conn: edge.id,
                    sender: Box::new(tx),
                });
            }
        }

        for input in inputs {
            if let Some(&i) = index.get(&input.node) {
                nodes[i].storage.attach(input.port, input.conn, input.receiver);
            }
        }

        for output in outputs {
            if let Some(&i) = index.get(&output.node) {
                nodes[i].outputs.push(OutputLink {
                    port: output.port,
                    conn: output.conn,
                    sender: output.sender,
                });
            }
        }

        Self {
            label,
            nodes,
            index,
            queue,
            inbox: inbox_rx,
            draw,
            idle_poll,
            check_values,
        }
    }

    fn run(&mut self, lifecycle: &Lifecycle) {
        select! {
            recv(lifecycle.start.receiver()) -> _ => {}
            recv(lifecycle.close.receiver()) -> _ => {
                debug!("[{}] closed before start", self.label);
                return;
            }
        }

        info!("[{}] started with {} node(s)", self.label, self.nodes.len());
        for hosted in &mut self.nodes {
            if let Err(e) = hosted.node.on_start() {
                error!("[{}] failed to start: {}", hosted.name, e);
                hosted.finish();
            } else if !hosted.producer && hosted.storage.input_count() == 0 {
                debug!("[{}] has no inputs", hosted.name);
                hosted.finish();
            }
        }

        let idle: Receiver<()> = never();
        let mut stopping = false;

        loop {
            if lifecycle.close.is_fired() {
                info!("[{}] close requested", self.label);
                break;
            }
            if !stopping && lifecycle.stop.is_fired() {
                stopping = true;
                self.stop_producers();
            }

            self.drain();
            if self.nodes.iter().all(|h| !h.running) {
                break;
            }

            let stepped = !stopping && self.step_producers();
            if stepped || !self.queue.borrow().is_empty() {
                continue;
            }

            let stop_rx = if stopping {
                &idle
            } else {
                lifecycle.stop.receiver()
            };
            let event = select! {
                recv(self.inbox) -> event => event.ok(),
                recv(stop_rx) -> _ => None,
                recv(lifecycle.close.receiver()) -> _ => None,
                default(self.idle_poll) => None,
            };
            if let Some(event) = event {
                self.handle(event);
            }
        }

        for hosted in &mut self.nodes {
            hosted.finish();
        }
        info!("[{}] event loop finished", self.label);
    }

    fn stop_producers(&mut self) {
        debug!("[{}] stopping producers", self.label);
        for hosted in self.nodes.iter_mut().filter(|h| h.producer) {
            hosted.finish();
        }
    }

    fn step_producers(&mut self) -> bool {
        let draw = self.draw.as_ref();
        let mut stepped = false;
        for hosted in self.nodes.iter_mut().filter(|h| h.producer && h.running) {
            hosted.step(draw, self.check_values);
            stepped = true;
        }
        stepped
    }

    fn drain(&mut self) {
        for _ in 0..DRAIN_BATCH {
            let local = self.queue.borrow_mut().pop_front();
            let event = match local {
                Some(event) => event,
                None => match self.inbox.try_recv() {
                    Ok(event) => event,
                    Err(_) => return,
                },
            };
            self.handle(event);
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Data { node, ctr } => {
                if let Some(&i) = self.index.get(&node) {
                    self.nodes[i].process(ctr, self.draw.as_ref(), self.check_values);
                }
            }
            Event::Closed { node, conn } => {
                if let Some(&i) = self.index.get(&node) {
                    self.nodes[i].input_closed(conn);
                }
            }
        }
    }
}
