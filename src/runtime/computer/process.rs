//! Process computer: a worker process hosting one process location
//!
//! The worker is spawned from the configured program (the current executable
//! by default) and driven over its stdin/stdout with the JSON-line protocol
//! of [`worker`](super::worker). A reader thread turns replies into setup
//! answers, forwards draw frames and fires the finished gate once the worker
//! reports that every hosted node finished or its stdout closes.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::worker::{Command, Reply, WORKER_ENV, write_line};
use super::{Computer, ComputerState, invalid_state};
use crate::runtime::bridge::PeerDirectory;
use crate::runtime::config::EngineConfig;
use crate::runtime::errors::{GraphError, GraphResult};
use crate::runtime::node::DrawSink;
use crate::runtime::serializer::PipelineDoc;
use crate::runtime::signal::Gate;

const EXIT_POLL: Duration = Duration::from_millis(10);

pub struct ProcessComputer {
    label: String,
    process: String,
    doc: PipelineDoc,
    config: EngineConfig,
    peers: Arc<PeerDirectory>,
    draw: Option<DrawSink>,
    state: ComputerState,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    control: Option<Receiver<Reply>>,
    reader: Option<JoinHandle<()>>,
    finished: Gate,
    addr: Option<SocketAddr>,
}

impl ProcessComputer {
    /// Computer for the nodes of `doc` placed in process `process`
    pub fn new(
        process: impl Into<String>,
        doc: PipelineDoc,
        config: &EngineConfig,
        peers: Arc<PeerDirectory>,
        draw: Option<DrawSink>,
    ) -> Self {
        let process = process.into();
        Self {
            label: format!("process:{}", process),
            process,
            doc,
            config: config.clone(),
            peers,
            draw,
            state: ComputerState::Created,
            child: None,
            stdin: None,
            control: None,
            reader: None,
            finished: Gate::new(),
            addr: None,
        }
    }

    /// OS process id of the worker, until it has been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn program(&self) -> GraphResult<PathBuf> {
        match &self.config.worker_program {
            Some(program) => Ok(program.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }

    fn send(&mut self, command: &Command) -> GraphResult {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| GraphError::Worker(format!("{} has no command pipe", self.label)))?;
        write_line(stdin, command)?;
        Ok(())
    }

    /// Wait for the worker's answer to the setup command
    fn await_ready(&mut self) -> GraphResult {
        let Some(control) = self.control.as_ref() else {
            return Err(GraphError::Worker(format!("{} has no reply pipe", self.label)));
        };
        match control.recv_timeout(self.config.setup_timeout()) {
            Ok(Reply::Ready { addr }) => {
                self.addr = addr;
                Ok(())
            }
            Ok(Reply::Failed { message }) => {
                Err(GraphError::Worker(format!("{}: {}", self.label, message)))
            }
            Ok(other) => Err(GraphError::Worker(format!(
                "{}: unexpected reply during setup: {:?}",
                self.label, other
            ))),
            Err(RecvTimeoutError::Timeout) => Err(GraphError::Timeout {
                computer: self.label.clone(),
                operation: "setup",
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(GraphError::Worker(format!("{} exited during setup", self.label)))
            }
        }
    }

    /// Kill the worker if it is still running and reap it
    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    warn!("[{}] killing worker {}", self.label, child.id());
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}

impl Computer for ProcessComputer {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> ComputerState {
        self.state
    }

    fn setup(&mut self) -> GraphResult {
        if self.state != ComputerState::Created {
            return Err(invalid_state(&self.label, "set up", self.state));
        }

        let program = self.program()?;
        debug!("[{}] spawning {}", self.label, program.display());
        let mut child = ProcessCommand::new(&program)
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        info!("[{}] worker pid {}", self.label, child.id());

        self.stdin = child.stdin.take();
        let stdout = child.stdout.take();
        self.child = Some(child);

        let wants_draw = self.draw.is_some();
        if let Some(stdout) = stdout {
            let (control_tx, control_rx) = unbounded();
            let label = self.label.clone();
            let draw = self.draw.take();
            let finished = self.finished.clone();
            self.reader = Some(
                thread::Builder::new()
                    .name(format!("{} replies", self.label))
                    .spawn(move || read_replies(label, stdout, control_tx, draw, finished))?,
            );
            self.control = Some(control_rx);
        }

        let command = Command::Setup {
            process: self.process.clone(),
            pipeline: self.doc.clone(),
            config: self.config.clone(),
            draw: wants_draw,
        };
        let ready = self.send(&command).and_then(|_| self.await_ready());
        if let Err(e) = ready {
            error!("[{}] setup failed: {}", self.label, e);
            self.stdin = None;
            self.kill();
            return Err(e);
        }

        debug!("[{}] ready, listening on {:?}", self.label, self.addr);
        self.state = ComputerState::Ready;
        Ok(())
    }

    fn start(&mut self) -> GraphResult {
        if self.state != ComputerState::Ready {
            return Err(invalid_state(&self.label, "start", self.state));
        }
        let peers = self.peers.snapshot();
        self.send(&Command::Start { peers })?;
        self.state = ComputerState::Started;
        Ok(())
    }

    fn request_stop(&mut self) {
        if !matches!(self.state, ComputerState::Ready | ComputerState::Started) {
            return;
        }
        let timeout_ms = self.config.stop_timeout_ms;
        if let Err(e) = self.send(&Command::Stop { timeout_ms }) {
            warn!("[{}] failed to request stop: {}", self.label, e);
        }
        self.state = ComputerState::Stopping;
    }

    fn close(&mut self, timeout: Duration) {
        if self.state == ComputerState::Closed {
            return;
        }
        let deadline = Instant::now() + timeout;

        if self.child.is_some() {
            // half the budget for the worker's own close, the rest for it to exit
            let timeout_ms = (timeout / 2).as_millis() as u64;
            if let Err(e) = self.send(&Command::Close { timeout_ms }) {
                debug!("[{}] close command not delivered: {}", self.label, e);
            }
            self.stdin = None;

            while let Some(child) = self.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!("[{}] worker exited with {}", self.label, status);
                        self.child = None;
                    }
                    Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                    Ok(None) => {
                        warn!("[{}] worker did not exit within {:?}", self.label, timeout);
                        self.kill();
                    }
                    Err(e) => {
                        warn!("[{}] failed to poll worker: {}", self.label, e);
                        self.kill();
                    }
                }
            }
        }

        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            warn!("[{}] reply reader panicked", self.label);
        }
        self.finished.fire();
        self.control = None;
        self.state = ComputerState::Closed;
        info!("[{}] closed", self.label);
    }

    fn join(&mut self, timeout: Duration) -> bool {
        if self.state == ComputerState::Created {
            return true;
        }
        self.finished.wait(timeout)
    }

    fn is_finished(&self) -> bool {
        self.finished.is_fired()
    }

    fn endpoint(&self) -> Option<(String, SocketAddr)> {
        self.addr.map(|addr| (self.process.clone(), addr))
    }
}

impl Drop for ProcessComputer {
    fn drop(&mut self) {
        self.stdin = None;
        self.kill();
    }
}

fn read_replies(
    label: String,
    stdout: ChildStdout,
    control: Sender<Reply>,
    draw: Option<DrawSink>,
    finished: Gate,
) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("[{}] failed to read reply: {}", label, e);
                break;
            }
        };
        let reply = match serde_json::from_str::<Reply>(&line) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("[{}] ignoring malformed reply: {}", label, e);
                continue;
            }
        };

        match reply {
            Reply::Draw { frame } => {
                if let Some(draw) = &draw {
                    let _ = draw.send(frame);
                }
            }
            Reply::Finished => {
                debug!("[{}] every hosted node finished", label);
                finished.fire();
            }
            Reply::Stopped { clean } => {
                if clean {
                    debug!("[{}] stopped", label);
                } else {
                    warn!("[{}] stop timed out inside the worker", label);
                }
            }
            reply @ (Reply::Ready { .. } | Reply::Failed { .. }) => {
                if let Reply::Failed { message } = &reply {
                    error!("[{}] {}", label, message);
                }
                let _ = control.send(reply);
            }
        }
    }
    debug!("[{}] reply stream closed", label);
    finished.fire();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_fails_setup() {
        let config = EngineConfig {
            worker_program: Some(PathBuf::from("/nonexistent/livegraph-worker")),
            ..Default::default()
        };
        let mut computer =
            ProcessComputer::new("w", PipelineDoc::new(), &config, PeerDirectory::new(), None);
        assert!(matches!(computer.setup(), Err(GraphError::Io(_))));
        assert_eq!(computer.state(), ComputerState::Created);
        assert_eq!(computer.label(), "process:w");
        computer.close(Duration::from_millis(100));
        assert_eq!(computer.state(), ComputerState::Closed);
    }

    #[test]
    fn test_start_requires_setup() {
        let mut computer = ProcessComputer::new(
            "w",
            PipelineDoc::new(),
            &EngineConfig::default(),
            PeerDirectory::new(),
            None,
        );
        assert!(matches!(computer.start(), Err(GraphError::InvalidState { .. })));
        assert!(computer.endpoint().is_none());
    }
}
