//! Execution locations for nodes
//!
//! A [`Location`] says where a node runs. `same` and `thread:<name>` live in
//! the process that owns the [`Graph`](super::graph::Graph); `process:<name>`
//! places the node in a dedicated worker process, optionally on a named
//! thread inside that worker (`process:<name>/<thread>`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::GraphError;

/// Process key of the graph-owning process
pub const ROOT_PROCESS: &str = "";

/// Where a node executes
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Location {
    /// The graph's default execution thread
    #[default]
    Same,
    /// A named thread inside the graph-owning process
    Thread { thread: String },
    /// A dedicated worker process, optionally on a named thread within it
    Process {
        process: String,
        thread: Option<String>,
    },
}

impl Location {
    pub fn thread(name: impl Into<String>) -> Self {
        Location::Thread {
            thread: name.into(),
        }
    }

    pub fn process(name: impl Into<String>) -> Self {
        Location::Process {
            process: name.into(),
            thread: None,
        }
    }

    pub fn process_thread(process: impl Into<String>, thread: impl Into<String>) -> Self {
        Location::Process {
            process: process.into(),
            thread: Some(thread.into()),
        }
    }

    /// Key of the OS process hosting this location ([`ROOT_PROCESS`] for the graph's own)
    pub fn process_key(&self) -> &str {
        match self {
            Location::Same | Location::Thread { .. } => ROOT_PROCESS,
            Location::Process { process, .. } => process,
        }
    }

    /// Whether this location lives in the graph-owning process
    pub fn is_root(&self) -> bool {
        self.process_key() == ROOT_PROCESS
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Location::Same => write!(f, "same"),
            Location::Thread { thread } => write!(f, "thread:{}", thread),
            Location::Process {
                process,
                thread: None,
            } => write!(f, "process:{}", process),
            Location::Process {
                process,
                thread: Some(thread),
            } => write!(f, "process:{}/{}", process, thread),
        }
    }
}

impl FromStr for Location {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GraphError::InvalidLocation(s.to_string());
        let s = s.trim();

        if s.is_empty() || s == "same" {
            return Ok(Location::Same);
        }

        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        match kind {
            "thread" if !rest.is_empty() && !rest.contains('/') => Ok(Location::thread(rest)),
            "process" => match rest.split_once('/') {
                None if !rest.is_empty() => Ok(Location::process(rest)),
                Some((process, thread)) if !process.is_empty() && !thread.is_empty() => {
                    Ok(Location::process_thread(process, thread))
                }
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Location {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Location> for String {
    fn from(location: Location) -> Self {
        location.to_string()
    }
}
