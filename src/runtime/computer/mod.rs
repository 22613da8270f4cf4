//! Computers: owners of one execution location
//!
//! A computer groups the nodes sharing a location and drives them through
//! `created → ready → started → stopping → closed`:
//!
//! - `setup` spawns the thread or process and wires its bridges
//! - `start` lets data flow
//! - `stop` is cooperative: producers finish, receivers finish once every
//!   input connection closed
//! - `close` is the forced path: bounded wait, then the thread is abandoned
//!   or the process killed
//!
//! Every wait is bounded by a timeout.

pub mod host;
pub mod process;
pub mod thread;
pub mod worker;

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use super::errors::{GraphError, GraphResult, NodeError, NodeResult};

pub use host::{HostEnv, build_hosts, take_hosted};
pub use process::ProcessComputer;
pub use thread::{HostPlan, ThreadComputer};
pub use worker::{WORKER_ENV, is_worker_process, run_worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputerState {
    Created,
    Ready,
    Started,
    Stopping,
    Closed,
}

impl fmt::Display for ComputerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ComputerState::Created => "created",
            ComputerState::Ready => "ready",
            ComputerState::Started => "started",
            ComputerState::Stopping => "stopping",
            ComputerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lifecycle owner of one thread or process
pub trait Computer: Send {
    fn label(&self) -> &str;

    fn state(&self) -> ComputerState;

    /// Spawn the thread or process and wire its bridges
    fn setup(&mut self) -> GraphResult;

    /// Release the start gate
    fn start(&mut self) -> GraphResult;

    /// Ask hosted nodes to finish, without waiting
    fn request_stop(&mut self);

    /// Cooperative stop, waiting up to `timeout`. Returns whether everything finished.
    fn stop(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        self.join(timeout)
    }

    /// Forced shutdown, bounded by `timeout`
    fn close(&mut self, timeout: Duration);

    /// Wait up to `timeout` for every hosted node to finish
    fn join(&mut self, timeout: Duration) -> bool;

    fn is_finished(&self) -> bool;

    /// Listening address for incoming process bridges, keyed by process
    fn endpoint(&self) -> Option<(String, SocketAddr)> {
        None
    }
}

pub(crate) fn invalid_state(
    computer: &str,
    operation: &'static str,
    state: ComputerState,
) -> GraphError {
    GraphError::InvalidState {
        computer: computer.to_string(),
        operation,
        state: state.to_string(),
    }
}

/// Text of a caught panic
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fold a caught panic into the node's own error type
pub(crate) fn call_result<T>(result: std::thread::Result<NodeResult<T>>) -> NodeResult<T> {
    result.unwrap_or_else(|payload| Err(NodeError::Panicked(panic_message(payload.as_ref()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_panic_message() {
        let caught = panic::catch_unwind(|| -> u32 { panic!("boom {}", 7) }).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 7");

        let caught = panic::catch_unwind(|| -> u32 { panic!("static") }).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static");
    }

    #[test]
    fn test_call_result() {
        let ok: std::thread::Result<NodeResult<u32>> = Ok(Ok(3));
        assert_eq!(call_result(ok).unwrap(), 3);

        let caught = panic::catch_unwind(|| -> NodeResult<u32> { panic!("bad") });
        assert!(matches!(call_result(caught), Err(NodeError::Panicked(m)) if m == "bad"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ComputerState::Stopping.to_string(), "stopping");
    }
}
