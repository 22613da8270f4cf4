//! Per-node input aggregation by tick

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use super::bridge::BridgeReceiver;
use super::node::Inputs;
use super::pipeline::ConnectionId;
use super::ports::Port;

struct InputSlot {
    port: String,
    conn: ConnectionId,
    receiver: Box<dyn BridgeReceiver>,
    closed: bool,
}

/// Collects what a node's input bridges hold for one tick.
///
/// Only bridges with data for exactly that tick contribute; optional ports
/// without data show up as `null`, required ones are reported missing.
pub struct DataStorage {
    node: String,
    ports: Vec<Port>,
    slots: Vec<InputSlot>,
}

impl DataStorage {
    pub fn new(node: impl Into<String>, ports: Vec<Port>) -> Self {
        Self {
            node: node.into(),
            ports,
            slots: Vec::new(),
        }
    }

    /// Attach the receiving half of the bridge feeding `port`
    pub fn attach(
        &mut self,
        port: impl Into<String>,
        conn: ConnectionId,
        receiver: Box<dyn BridgeReceiver>,
    ) {
        let port = port.into();
        debug!(
            "[{}] input '{}' via {} bridge",
            self.node,
            port,
            receiver.kind()
        );
        self.slots.push(InputSlot {
            port,
            conn,
            receiver,
            closed: false,
        });
    }

    /// Candidate inputs for tick `ctr`
    pub fn collect(&self, ctr: u64) -> Inputs {
        let mut values = BTreeMap::new();
        let mut missing = Vec::new();

        for port in &self.ports {
            let value = self
                .slots
                .iter()
                .filter(|s| s.port == port.key())
                .find_map(|s| s.receiver.get(ctr));

            match value {
                Some(value) => {
                    values.insert(port.key().to_string(), value);
                }
                None if port.is_optional() => {
                    values.insert(port.key().to_string(), Value::Null);
                }
                None => missing.push(port.key().to_string()),
            }
        }

        Inputs::new(values, missing)
    }

    /// Drop everything buffered for ticks before `ctr` on every input
    pub fn discard_before(&self, ctr: u64) {
        for slot in &self.slots {
            slot.receiver.discard_before(ctr);
        }
    }

    /// Record that `conn` will deliver nothing more. Returns false if unknown or already closed.
    pub fn mark_closed(&mut self, conn: ConnectionId) -> bool {
        match self.slots.iter_mut().find(|s| s.conn == conn) {
            Some(slot) if !slot.closed => {
                slot.closed = true;
                true
            }
            _ => false,
        }
    }

    /// Every attached input has been closed
    pub fn all_closed(&self) -> bool {
        self.slots.iter().all(|s| s.closed)
    }

    pub fn input_count(&self) -> usize {
        self.slots.len()
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.closed).count()
    }

    /// Total ticks buffered across all inputs
    pub fn buffered(&self) -> usize {
        self.slots.iter().map(|s| s.receiver.buffered()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bridge::{BridgeSender, LocalBridge, LocalQueue};
    use crate::runtime::bridge::local::LocalSender;
    use crate::runtime::pipeline::NodeId;
    use crate::runtime::ports::PortType;
    use serde_json::json;

    fn storage_with(ports: Vec<Port>) -> (DataStorage, Vec<LocalSender>) {
        let queue = LocalQueue::default();
        let mut storage = DataStorage::new("sum", ports.clone());
        let mut senders = Vec::new();
        for (i, port) in ports.iter().enumerate() {
            let (tx, rx) = LocalBridge::pair(port.key(), NodeId(0), ConnectionId(i), queue.clone());
            storage.attach(port.key(), ConnectionId(i), Box::new(rx));
            senders.push(tx);
        }
        (storage, senders)
    }

    #[test]
    fn test_tick_gating_requires_same_ctr() {
        let ports = vec![
            Port::new("a", PortType::number()),
            Port::new("b", PortType::number()),
        ];
        let (storage, senders) = storage_with(ports);

        senders[0].put(1, json!(1)).unwrap();
        senders[1].put(2, json!(2)).unwrap();
        assert!(!storage.collect(1).has_required());
        assert!(!storage.collect(2).has_required());
        assert_eq!(storage.collect(1).missing(), &["b".to_string()]);

        senders[1].put(1, json!(10)).unwrap();
        let inputs = storage.collect(1);
        assert!(inputs.has_required());
        assert_eq!(inputs.get("a"), Some(&json!(1)));
        assert_eq!(inputs.get("b"), Some(&json!(10)));
    }

    #[test]
    fn test_out_of_order_arrival_matches_by_tick() {
        let ports = vec![
            Port::new("a", PortType::number()),
            Port::new("b", PortType::number()),
        ];
        let (storage, senders) = storage_with(ports);

        senders[0].put(3, json!("a3")).unwrap();
        senders[0].put(2, json!("a2")).unwrap();
        senders[1].put(2, json!("b2")).unwrap();
        senders[1].put(3, json!("b3")).unwrap();

        let inputs = storage.collect(3);
        assert_eq!(inputs.get("a"), Some(&json!("a3")));
        assert_eq!(inputs.get("b"), Some(&json!("b3")));
    }

    #[test]
    fn test_optional_port_defaults_to_null() {
        let ports = vec![
            Port::new("data", PortType::number()),
            Port::new("toggle", PortType::boolean()).optional(),
        ];
        let (storage, senders) = storage_with(ports);

        senders[0].put(1, json!(4)).unwrap();
        let inputs = storage.collect(1);
        assert!(inputs.has_required());
        assert_eq!(inputs.get("toggle"), Some(&Value::Null));
    }

    #[test]
    fn test_discard_before_reclaims() {
        let ports = vec![Port::new("a", PortType::any())];
        let (storage, senders) = storage_with(ports);
        for ctr in 1..=5 {
            senders[0].put(ctr, json!(ctr)).unwrap();
        }
        storage.discard_before(5);
        assert_eq!(storage.buffered(), 1);
        assert!(!storage.collect(3).has_required());
    }

    #[test]
    fn test_close_bookkeeping() {
        let ports = vec![
            Port::new("a", PortType::any()),
            Port::new("b", PortType::any()),
        ];
        let (mut storage, _senders) = storage_with(ports);
        assert_eq!(storage.open_count(), 2);
        assert!(storage.mark_closed(ConnectionId(0)));
        assert!(!storage.mark_closed(ConnectionId(0)));
        assert!(!storage.all_closed());
        assert!(storage.mark_closed(ConnectionId(1)));
        assert!(storage.all_closed());
        assert!(!storage.mark_closed(ConnectionId(9)));
    }
}
