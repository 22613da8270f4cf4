//! Same-thread bridge
//!
//! Both halves live on the computer thread that created them. Events go to
//! that thread's local queue; no synchronization beyond a closed flag.

use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use super::{BridgeKind, BridgeReceiver, BridgeSender, Event};
use crate::runtime::errors::BridgeError;
use crate::runtime::pipeline::{ConnectionId, NodeId};

/// Pending events of one computer thread
pub type LocalQueue = Rc<RefCell<VecDeque<Event>>>;

struct LocalState {
    buffer: RefCell<BTreeMap<u64, Value>>,
    closed: Cell<bool>,
}

/// Factory for a same-thread bridge
pub struct LocalBridge;

impl LocalBridge {
    /// Create both halves of a bridge feeding `node` through `conn`
    pub fn pair(
        label: impl Into<String>,
        node: NodeId,
        conn: ConnectionId,
        queue: LocalQueue,
    ) -> (LocalSender, LocalReceiver) {
        let state = Rc::new(LocalState {
            buffer: RefCell::new(BTreeMap::new()),
            closed: Cell::new(false),
        });
        (
            LocalSender {
                label: label.into(),
                node,
                conn,
                queue,
                state: Rc::clone(&state),
            },
            LocalReceiver { state },
        )
    }
}

pub struct LocalSender {
    label: String,
    node: NodeId,
    conn: ConnectionId,
    queue: LocalQueue,
    state: Rc<LocalState>,
}

impl BridgeSender for LocalSender {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Local
    }

    fn put(&self, ctr: u64, item: Value) -> Result<(), BridgeError> {
        if self.state.closed.get() {
            return Err(BridgeError::Closed(self.label.clone()));
        }
        self.state.buffer.borrow_mut().insert(ctr, item);
        self.queue.borrow_mut().push_back(Event::Data {
            node: self.node,
            ctr,
        });
        Ok(())
    }

    fn close(&self) {
        if self.state.closed.replace(true) {
            return;
        }
        self.queue.borrow_mut().push_back(Event::Closed {
            node: self.node,
            conn: self.conn,
        });
    }

    fn is_closed(&self) -> bool {
        self.state.closed.get()
    }
}

pub struct LocalReceiver {
    state: Rc<LocalState>,
}

impl BridgeReceiver for LocalReceiver {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Local
    }

    fn get(&self, ctr: u64) -> Option<Value> {
        self.state.buffer.borrow().get(&ctr).cloned()
    }

    fn discard_before(&self, ctr: u64) {
        let mut buffer = self.state.buffer.borrow_mut();
        *buffer = buffer.split_off(&ctr);
    }

    fn is_closed(&self) -> bool {
        self.state.closed.get()
    }

    fn buffered(&self) -> usize {
        self.state.buffer.borrow().len()
    }
}
