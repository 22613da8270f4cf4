//! Arithmetic nodes

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::runtime::errors::{GraphResult, NodeResult};
use crate::runtime::node::{Context, Inputs, Node, Port, PortType};
use crate::runtime::registry::{NodeClass, parse_settings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleSettings {
    pub factor: f64,
}

/// Multiplies `in` by a constant factor
pub struct Scale {
    factor: f64,
}

impl Scale {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Node for Scale {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn ports_in(&self) -> Vec<Port> {
        vec![Port::new("in", PortType::number())]
    }

    fn ports_out(&self) -> Vec<Port> {
        vec![Port::new("out", PortType::number())]
    }

    fn settings(&self) -> Value {
        json!({ "factor": self.factor })
    }

    fn process(&mut self, inputs: &Inputs, ctx: &mut Context<'_>) -> NodeResult {
        let value = inputs.number("in")?;
        ctx.emit(Value::from(value * self.factor))
    }
}

impl NodeClass for Scale {
    const CLASS: &'static str = "Scale";

    fn from_settings(settings: &Value) -> GraphResult<Self> {
        let s: ScaleSettings = parse_settings(Self::CLASS, settings)?;
        Ok(Self::new(s.factor))
    }
}

/// Sum of `a` and `b` for ticks where both arrived
#[derive(Default)]
pub struct Add;

impl Add {
    pub fn new() -> Self {
        Self
    }
}

impl Node for Add {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn ports_in(&self) -> Vec<Port> {
        vec![
            Port::new("a", PortType::number()),
            Port::new("b", PortType::number()),
        ]
    }

    fn ports_out(&self) -> Vec<Port> {
        vec![Port::new("sum", PortType::number())]
    }

    fn process(&mut self, inputs: &Inputs, ctx: &mut Context<'_>) -> NodeResult {
        let sum = inputs.number("a")? + inputs.number("b")?;
        ctx.emit(Value::from(sum))
    }
}

impl NodeClass for Add {
    const CLASS: &'static str = "Add";

    fn from_settings(_settings: &Value) -> GraphResult<Self> {
        Ok(Self)
    }
}
