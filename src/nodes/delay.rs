//! Slow pass-through

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::thread;
use std::time::Duration;

use crate::runtime::errors::{GraphResult, NodeResult};
use crate::runtime::node::{Context, Inputs, Node, Port, PortType};
use crate::runtime::registry::{NodeClass, parse_settings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelaySettings {
    pub millis: u64,
}

/// Forwards `in` after sleeping, holding up its event loop meanwhile
pub struct Delay {
    delay: Duration,
}

impl Delay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Node for Delay {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn ports_in(&self) -> Vec<Port> {
        vec![Port::new("in", PortType::any())]
    }

    fn ports_out(&self) -> Vec<Port> {
        vec![Port::new("out", PortType::any())]
    }

    fn settings(&self) -> Value {
        json!({ "millis": self.delay.as_millis() as u64 })
    }

    fn process(&mut self, inputs: &Inputs, ctx: &mut Context<'_>) -> NodeResult {
        thread::sleep(self.delay);
        ctx.emit(inputs.require("in")?.clone())
    }
}

impl NodeClass for Delay {
    const CLASS: &'static str = "Delay";

    fn from_settings(settings: &Value) -> GraphResult<Self> {
        let s: DelaySettings = parse_settings(Self::CLASS, settings)?;
        Ok(Self::new(Duration::from_millis(s.millis)))
    }
}
