//! Live push-based dataflow engine
//!
//! Nodes exchange JSON values over typed ports. Each node is placed at a
//! [`Location`]: the graph's own thread, a named thread, or a named worker
//! process. Data is tagged with the emitting node's clock tick, and a node
//! with several inputs processes a tick once every required input delivered
//! data for it.
//!
//! # Architecture
//!
//! - **Pipeline**: node arena plus connections, built in code or loaded from JSON
//! - **Bridges**: per-connection transport picked from the two locations
//!   (same thread, shared buffer between threads, loopback TCP between processes)
//! - **Computers**: one event loop per location, owning a thread or a worker process
//! - **Graph**: discovers connected nodes and drives their computers through
//!   setup, start, stop and close
//!
//! # Example
//!
//! ```no_run
//! use livegraph::nodes::{Counter, Print, Scale};
//! use livegraph::{Graph, Location, Pipeline};
//! use std::time::Duration;
//!
//! let mut pipeline = Pipeline::new();
//! let count = pipeline.add_node("count", Location::Same, Counter::new(10))?;
//! let scale = pipeline.add_node("scale", Location::thread("math"), Scale::new(0.5))?;
//! let print = pipeline.add_node("print", Location::Same, Print::new())?;
//! pipeline.add_input(scale, count, "value", "in")?;
//! pipeline.add_input(print, scale, "out", "in")?;
//!
//! let mut graph = Graph::new(pipeline, count);
//! graph.start_all()?;
//! graph.join(Duration::from_secs(5));
//! graph.stop_all(Duration::from_secs(1));
//! # Ok::<(), livegraph::GraphError>(())
//! ```

pub mod nodes;
pub mod runtime;

pub use runtime::{
    BridgeError, BridgeKind, Computer, ComputerState, ConfigError, Connection, ConnectionId,
    Context, DrawFrame, EngineConfig, Graph, GraphError, GraphResult, Inputs, Location, Node,
    NodeClass, NodeError, NodeId, NodeRegistry, NodeResult, Pipeline, PipelineDoc, Port,
    PortType, ProcessComputer, Step, ThreadComputer,
};
