//! Point-to-point transports for connections
//!
//! Every connection gets exactly one bridge, chosen at graph start from the
//! two endpoints' [`Location`]s. A bridge is split into an emitting half
//! ([`BridgeSender`]) and a receiving half ([`BridgeReceiver`]). The receiving
//! half buffers values by tick, so arrival order does not matter; every put
//! or close also produces an [`Event`] for the receiving computer's loop.
//!
//! | kind    | endpoints                 | cost |
//! |---------|---------------------------|------|
//! | local   | same location             | 1    |
//! | thread  | same process              | 2    |
//! | process | same host                 | 3    |

pub mod local;
pub mod process;
pub mod thread;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::errors::{BridgeError, GraphError};
use super::location::Location;
use super::pipeline::{ConnectionId, NodeId};

pub use local::{LocalBridge, LocalQueue};
pub use process::{PeerDirectory, ProcessLink, ProcessSender};
pub use thread::{SharedReceiver, ThreadSender, TickBuffer};

/// Notification delivered to the computer hosting the receiving node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Data for `ctr` arrived on one of `node`'s inputs
    Data { node: NodeId, ctr: u64 },
    /// Input connection `conn` of `node` will carry no more data
    Closed { node: NodeId, conn: ConnectionId },
}

/// Available transport strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeKind {
    Local,
    Thread,
    Process,
}

/// Every built-in bridge kind, in registration order
pub const BRIDGE_KINDS: [BridgeKind; 3] =
    [BridgeKind::Local, BridgeKind::Thread, BridgeKind::Process];

impl BridgeKind {
    pub fn cost(&self) -> u32 {
        match self {
            BridgeKind::Local => 1,
            BridgeKind::Thread => 2,
            BridgeKind::Process => 3,
        }
    }

    /// Whether this kind can connect `from` to `to`, and at what cost
    pub fn can_handle(&self, from: &Location, to: &Location) -> (bool, u32) {
        let ok = match self {
            BridgeKind::Local => from == to,
            BridgeKind::Thread => from.process_key() == to.process_key(),
            BridgeKind::Process => true,
        };
        (ok, self.cost())
    }
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BridgeKind::Local => write!(f, "local"),
            BridgeKind::Thread => write!(f, "thread"),
            BridgeKind::Process => write!(f, "process"),
        }
    }
}

/// Pick the cheapest of `kinds` able to connect `from` to `to`
pub fn resolve_bridge(
    kinds: &[BridgeKind],
    from: &Location,
    to: &Location,
) -> Result<BridgeKind, GraphError> {
    kinds
        .iter()
        .filter_map(|kind| match kind.can_handle(from, to) {
            (true, cost) => Some((cost, *kind)),
            (false, _) => None,
        })
        .min_by_key(|(cost, _)| *cost)
        .map(|(_, kind)| kind)
        .ok_or_else(|| GraphError::NoBridgeAvailable {
            from: from.clone(),
            to: to.clone(),
        })
}

/// Emitting half of a bridge
pub trait BridgeSender {
    fn kind(&self) -> BridgeKind;

    /// Hand `item` over for tick `ctr`. Never blocks on the receiver.
    fn put(&self, ctr: u64, item: Value) -> Result<(), BridgeError>;

    /// Signal that no more data follows
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Receiving half of a bridge
pub trait BridgeReceiver {
    fn kind(&self) -> BridgeKind;

    /// Value buffered for exactly `ctr`, if any
    fn get(&self, ctr: u64) -> Option<Value>;

    /// Drop every buffered entry strictly older than `ctr`
    fn discard_before(&self, ctr: u64);

    /// The sender closed and everything it sent has been buffered
    fn is_closed(&self) -> bool;

    /// Number of buffered ticks
    fn buffered(&self) -> usize;
}

/// An output connection of a node as seen from its computer
pub struct OutputLink {
    pub port: String,
    pub conn: ConnectionId,
    pub sender: Box<dyn BridgeSender>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_location_prefers_local() {
        for loc in [
            Location::Same,
            Location::thread("a"),
            Location::process_thread("p", "t"),
        ] {
            // all three can handle it, local wins on cost
            for kind in BRIDGE_KINDS {
                assert!(kind.can_handle(&loc, &loc).0);
            }
            assert_eq!(
                resolve_bridge(&BRIDGE_KINDS, &loc, &loc).unwrap(),
                BridgeKind::Local
            );
        }
    }

    #[test]
    fn test_same_process_uses_thread() {
        let kind = resolve_bridge(&BRIDGE_KINDS, &Location::Same, &Location::thread("b")).unwrap();
        assert_eq!(kind, BridgeKind::Thread);

        let kind = resolve_bridge(
            &BRIDGE_KINDS,
            &Location::process_thread("p", "a"),
            &Location::process("p"),
        )
        .unwrap();
        assert_eq!(kind, BridgeKind::Thread);
    }

    #[test]
    fn test_cross_process_uses_process() {
        let kind =
            resolve_bridge(&BRIDGE_KINDS, &Location::Same, &Location::process("p")).unwrap();
        assert_eq!(kind, BridgeKind::Process);
    }

    #[test]
    fn test_restricted_kinds() {
        // without local, same-location edges fall back to thread
        let kinds = [BridgeKind::Thread, BridgeKind::Process];
        assert_eq!(
            resolve_bridge(&kinds, &Location::Same, &Location::Same).unwrap(),
            BridgeKind::Thread
        );

        let kinds = [BridgeKind::Local];
        let err = resolve_bridge(&kinds, &Location::Same, &Location::thread("x")).unwrap_err();
        assert!(matches!(err, GraphError::NoBridgeAvailable { .. }));
    }

    #[test]
    fn test_kind_serde() {
        let kinds: Vec<BridgeKind> = serde_json::from_str(r#"["local","process"]"#).unwrap();
        assert_eq!(kinds, vec![BridgeKind::Local, BridgeKind::Process]);
    }
}
