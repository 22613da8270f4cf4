//! Runtime support for live node graphs

pub mod bridge;
pub mod clock;
pub mod computer;
pub mod config;
pub mod errors;
pub mod graph;
pub mod location;
pub mod node;
pub mod pipeline;
pub mod ports;
pub mod registry;
pub mod serializer;
pub mod signal;
pub mod storage;
pub mod topology;
pub mod watchdog;

pub use bridge::{BRIDGE_KINDS, BridgeKind, resolve_bridge};
pub use clock::Clock;
pub use computer::{Computer, ComputerState, ProcessComputer, ThreadComputer};
pub use config::EngineConfig;
pub use errors::{BridgeError, ConfigError, GraphError, GraphResult, NodeError, NodeResult};
pub use graph::Graph;
pub use location::Location;
pub use node::{Context, DrawFrame, Inputs, Node, Step};
pub use pipeline::{Connection, ConnectionId, NodeId, NodeInfo, Pipeline};
pub use ports::{Port, PortType};
pub use registry::{NodeClass, NodeRegistry};
pub use serializer::{InputDoc, NodeDoc, PipelineDoc};
pub use storage::DataStorage;
pub use watchdog::Watchdog;
