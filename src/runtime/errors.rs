//! Error types for the runtime system

use super::location::Location;

/// Error type for graph construction, placement and lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(
        "Incompatible port types: {emit_node}.{emit_port} ({emit_type}) -> {recv_node}.{recv_port} ({recv_type})"
    )]
    IncompatibleType {
        emit_node: String,
        emit_port: String,
        emit_type: String,
        recv_node: String,
        recv_port: String,
        recv_type: String,
    },

    #[error("Node '{0}' is not part of this pipeline")]
    InvalidNode(String),

    #[error("Port '{port}' not found on node '{node}'")]
    PortNotFound { node: String, port: String },

    #[error("Connection already exists: {0}")]
    DuplicateConnection(String),

    #[error("Input port '{port}' on node '{node}' is already connected")]
    PortAlreadyConnected { node: String, port: String },

    #[error("Connection would close a cycle: {0}")]
    Cycle(String),

    #[error("Node with name '{0}' already exists")]
    DuplicateName(String),

    #[error("No bridge available from {from} to {to}")]
    NoBridgeAvailable { from: Location, to: Location },

    #[error("Invalid location '{0}'")]
    InvalidLocation(String),

    #[error("Node class '{0}' is not registered")]
    UnknownClass(String),

    #[error("Invalid settings for {class}: {reason}")]
    InvalidSettings { class: String, reason: String },

    #[error("A node registry is required to place '{0}' in another process")]
    RegistryRequired(String),

    #[error("Computer '{computer}' cannot {operation} while {state}")]
    InvalidState {
        computer: String,
        operation: &'static str,
        state: String,
    },

    #[error("Computer '{computer}' timed out during {operation}")]
    Timeout {
        computer: String,
        operation: &'static str,
    },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error type for bridge operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Bridge '{0}' is closed")]
    Closed(String),

    #[error("Receiver of bridge '{0}' is gone")]
    Disconnected(String),
}

/// Error type returned by node callbacks
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Failed to emit: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Missing input '{0}'")]
    MissingInput(String),

    #[error("Invalid value on '{port}': {reason}")]
    InvalidValue { port: String, reason: String },

    #[error("No output port named '{0}'")]
    UnknownOutput(String),

    #[error("Node-specific error: {0}")]
    Failed(String),

    #[error("Panicked: {0}")]
    Panicked(String),
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type for node callbacks
pub type NodeResult<T = ()> = Result<T, NodeError>;

/// Result type for graph operations
pub type GraphResult<T = ()> = Result<T, GraphError>;
