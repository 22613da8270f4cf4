//! One-shot signals used to drive computer lifecycles
//!
//! A [`Gate`] is a closeable channel: firing drops the only sender, so every
//! receiver observes disconnection from then on. That makes gates usable
//! inside `crossbeam_channel::select!` next to regular data channels.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct GateInner {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// A signal that fires once and stays fired
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(GateInner {
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// Fire the gate. Idempotent.
    pub fn fire(&self) {
        self.inner.tx.lock().take();
    }

    pub fn is_fired(&self) -> bool {
        matches!(self.inner.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until fired or until `timeout` elapses. Returns whether it fired.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.inner.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Block until fired
    pub fn wait_fired(&self) {
        let _ = self.inner.rx.recv();
    }

    /// Receiver that becomes ready (disconnected) once the gate fires
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.rx
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// The three lifecycle gates shared between a computer and its worker
#[derive(Clone, Default)]
pub struct Lifecycle {
    pub start: Gate,
    pub stop: Gate,
    pub close: Gate,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fire_once_stays_fired() {
        let gate = Gate::new();
        assert!(!gate.is_fired());
        gate.fire();
        assert!(gate.is_fired());
        gate.fire();
        assert!(gate.is_fired());
        assert!(gate.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_times_out() {
        let gate = Gate::new();
        let start = Instant::now();
        assert!(!gate.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_fire_from_other_thread() {
        let gate = Gate::new();
        let remote = gate.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.fire();
        });
        assert!(gate.wait(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_select_sees_fired_gate() {
        let gate = Gate::new();
        let (_tx, data) = crossbeam_channel::unbounded::<u32>();
        gate.fire();
        crossbeam_channel::select! {
            recv(data) -> _ => panic!("no data was sent"),
            recv(gate.receiver()) -> msg => assert!(msg.is_err()),
        }
    }
}
