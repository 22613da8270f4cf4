//! Multi-rate selector

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::errors::{GraphResult, NodeResult};
use crate::runtime::node::{Context, Inputs, Node, Port, PortType};
use crate::runtime::registry::{NodeClass, parse_settings};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchSettings {
    /// Forward `b` instead of `a` until a toggle says otherwise
    pub use_b: bool,
}

/// Forwards `a` or `b`, selected by the last value seen on `toggle`.
///
/// Every input is optional and any of them triggers processing, so inputs
/// running at different rates are forwarded as they arrive. A tick may be
/// offered several times as its inputs trickle in; at most one value is
/// forwarded per tick.
pub struct Switch {
    use_b: bool,
    /// Last tick a value was forwarded for
    forwarded: u64,
}

impl Switch {
    pub fn new(use_b: bool) -> Self {
        Self { use_b, forwarded: 0 }
    }
}

impl Node for Switch {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn ports_in(&self) -> Vec<Port> {
        vec![
            Port::new("toggle", PortType::boolean()).optional(),
            Port::new("a", PortType::any()).optional(),
            Port::new("b", PortType::any()).optional(),
        ]
    }

    fn ports_out(&self) -> Vec<Port> {
        vec![Port::new("out", PortType::any())]
    }

    fn settings(&self) -> Value {
        serde_json::to_value(SwitchSettings { use_b: self.use_b }).unwrap_or_default()
    }

    fn should_process(&self, inputs: &Inputs) -> bool {
        inputs.iter().any(|(_, value)| !value.is_null())
    }

    fn process(&mut self, inputs: &Inputs, ctx: &mut Context<'_>) -> NodeResult {
        if let Some(toggle) = inputs.get("toggle").and_then(Value::as_bool) {
            self.use_b = toggle;
        }
        if ctx.ctr() <= self.forwarded {
            return Ok(());
        }
        let selected = if self.use_b { "b" } else { "a" };
        match inputs.get(selected) {
            Some(value) if !value.is_null() => {
                ctx.emit(value.clone())?;
                self.forwarded = ctx.ctr();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl NodeClass for Switch {
    const CLASS: &'static str = "Switch";

    fn from_settings(settings: &Value) -> GraphResult<Self> {
        let s: SwitchSettings = parse_settings(Self::CLASS, settings)?;
        Ok(Self::new(s.use_b))
    }
}
