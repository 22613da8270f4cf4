//! Cross-thread bridge
//!
//! The receiving half is a shared [`TickBuffer`]; the emitting half inserts
//! into it directly and notifies the receiving computer through its
//! crossbeam inbox. The same buffer type backs the receiving half of the
//! process bridge.

use crossbeam_channel::Sender as CrossbeamSender;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{BridgeKind, BridgeReceiver, BridgeSender, Event};
use crate::runtime::errors::BridgeError;
use crate::runtime::pipeline::{ConnectionId, NodeId};

/// Tick-keyed buffer shared between threads
#[derive(Default)]
pub struct TickBuffer {
    values: Mutex<BTreeMap<u64, Value>>,
    closed: AtomicBool,
}

impl TickBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, ctr: u64, item: Value) {
        self.values.lock().insert(ctr, item);
    }

    pub fn get(&self, ctr: u64) -> Option<Value> {
        self.values.lock().get(&ctr).cloned()
    }

    pub fn discard_before(&self, ctr: u64) {
        let mut values = self.values.lock();
        *values = values.split_off(&ctr);
    }

    /// Mark closed; returns false if it already was
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

/// Emitting half of a thread bridge
pub struct ThreadSender {
    label: String,
    node: NodeId,
    conn: ConnectionId,
    buffer: Arc<TickBuffer>,
    inbox: CrossbeamSender<Event>,
}

impl ThreadSender {
    /// Create both halves of a bridge feeding `node` (hosted by the computer owning `inbox`)
    pub fn pair(
        label: impl Into<String>,
        node: NodeId,
        conn: ConnectionId,
        inbox: CrossbeamSender<Event>,
    ) -> (ThreadSender, SharedReceiver) {
        let buffer = TickBuffer::new();
        (
            ThreadSender {
                label: label.into(),
                node,
                conn,
                buffer: Arc::clone(&buffer),
                inbox,
            },
            SharedReceiver::new(buffer, BridgeKind::Thread),
        )
    }
}

impl BridgeSender for ThreadSender {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Thread
    }

    fn put(&self, ctr: u64, item: Value) -> Result<(), BridgeError> {
        if self.buffer.is_closed() {
            return Err(BridgeError::Closed(self.label.clone()));
        }
        self.buffer.insert(ctr, item);
        self.inbox
            .send(Event::Data {
                node: self.node,
                ctr,
            })
            .map_err(|_| BridgeError::Disconnected(self.label.clone()))
    }

    fn close(&self) {
        if self.buffer.close() {
            let _ = self.inbox.send(Event::Closed {
                node: self.node,
                conn: self.conn,
            });
        }
    }

    fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }
}

/// Receiving half backed by a shared [`TickBuffer`]
pub struct SharedReceiver {
    buffer: Arc<TickBuffer>,
    kind: BridgeKind,
}

impl SharedReceiver {
    pub fn new(buffer: Arc<TickBuffer>, kind: BridgeKind) -> Self {
        Self { buffer, kind }
    }
}

impl BridgeReceiver for SharedReceiver {
    fn kind(&self) -> BridgeKind {
        self.kind
    }

    fn get(&self, ctr: u64) -> Option<Value> {
        self.buffer.get(ctr)
    }

    fn discard_before(&self, ctr: u64) {
        self.buffer.discard_before(ctr);
    }

    fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use proptest::prelude::*;
    use serde_json::json;
    use std::thread;

    #[test]
    fn test_put_from_other_thread_notifies_inbox() {
        let (inbox_tx, inbox_rx) = unbounded();
        let (tx, rx) = ThreadSender::pair("a->b", NodeId(3), ConnectionId(1), inbox_tx);

        let handle = thread::spawn(move || {
            tx.put(1, json!(10)).unwrap();
            tx.put(2, json!(20)).unwrap();
            tx.close();
        });
        handle.join().unwrap();

        let events: Vec<_> = inbox_rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                Event::Data { node: NodeId(3), ctr: 1 },
                Event::Data { node: NodeId(3), ctr: 2 },
                Event::Closed { node: NodeId(3), conn: ConnectionId(1) },
            ]
        );
        assert_eq!(rx.get(2), Some(json!(20)));
        assert!(rx.is_closed());
    }

    #[test]
    fn test_put_after_close_fails_loudly() {
        let (inbox_tx, _inbox_rx) = unbounded();
        let (tx, _rx) = ThreadSender::pair("a->b", NodeId(0), ConnectionId(0), inbox_tx);
        tx.close();
        assert_eq!(
            tx.put(1, json!(1)),
            Err(BridgeError::Closed("a->b".to_string()))
        );
    }

    #[test]
    fn test_put_to_vanished_receiver() {
        let (inbox_tx, inbox_rx) = unbounded();
        let (tx, _rx) = ThreadSender::pair("a->b", NodeId(0), ConnectionId(0), inbox_tx);
        drop(inbox_rx);
        assert!(matches!(
            tx.put(1, json!(1)),
            Err(BridgeError::Disconnected(_))
        ));
    }

    #[test]
    fn test_discard_before_five() {
        let buffer = TickBuffer::new();
        let rx = SharedReceiver::new(Arc::clone(&buffer), BridgeKind::Thread);
        for ctr in 1..=5 {
            buffer.insert(ctr, json!(ctr));
        }
        rx.discard_before(5);
        assert_eq!(rx.get(3), None);
        assert_eq!(rx.get(5), Some(json!(5)));
    }

    proptest! {
        #[test]
        fn test_discard_keeps_only_newer(
            ticks in prop::collection::btree_set(0u64..200, 0..40),
            cut in 0u64..200,
        ) {
            let buffer = TickBuffer::new();
            for &t in &ticks {
                buffer.insert(t, json!(t));
            }
            buffer.discard_before(cut);
            for &t in &ticks {
                prop_assert_eq!(buffer.get(t).is_some(), t >= cut);
            }
        }
    }
}
