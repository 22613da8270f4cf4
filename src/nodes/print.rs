//! Logging sink

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::runtime::errors::{GraphResult, NodeResult};
use crate::runtime::node::{Context, Inputs, Node, Port, PortType};
use crate::runtime::registry::{NodeClass, parse_settings};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    /// Only log; do not hand values to the draw hook
    pub quiet: bool,
}

/// Logs every value it receives and forwards it to the draw hook
#[derive(Default)]
pub struct Print {
    settings: PrintSettings,
}

impl Print {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quiet(mut self) -> Self {
        self.settings.quiet = true;
        self
    }
}

impl Node for Print {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn ports_in(&self) -> Vec<Port> {
        vec![Port::new("in", PortType::any())]
    }

    fn settings(&self) -> Value {
        serde_json::to_value(&self.settings).unwrap_or_default()
    }

    fn process(&mut self, inputs: &Inputs, ctx: &mut Context<'_>) -> NodeResult {
        let value = inputs.require("in")?;
        info!("[{}] {} @ {}", ctx.node_name(), value, ctx.ctr());
        if !self.settings.quiet {
            ctx.emit_draw(value.clone());
        }
        Ok(())
    }
}

impl NodeClass for Print {
    const CLASS: &'static str = "Print";

    fn from_settings(settings: &Value) -> GraphResult<Self> {
        Ok(Self {
            settings: parse_settings(Self::CLASS, settings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_draws_unless_quiet() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let inputs = crate::nodes::harness::inputs(&Print::new(), json!({ "in": 5 }));

        let mut ctx = Context::new("p", 2, &[], &[], Some(&tx), false);
        Print::new().process(&inputs, &mut ctx).unwrap();
        assert_eq!(rx.try_recv().unwrap().value, json!(5));

        let mut ctx = Context::new("p", 3, &[], &[], Some(&tx), false);
        Print::new().quiet().process(&inputs, &mut ctx).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(Print::new().quiet().settings(), json!({ "quiet": true }));
    }
}
