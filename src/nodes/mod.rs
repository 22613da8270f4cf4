//! Built-in nodes
//!
//! A small set of nodes used by the CLI, saved pipelines and tests:
//! - **Counter**: producer emitting a numeric ramp
//! - **Scale**, **Add**: arithmetic on numeric inputs
//! - **Switch**: forwards one of two inputs, triggered by any input
//! - **Delay**: slow pass-through
//! - **Print**: logging sink feeding the draw hook

mod counter;
mod delay;
mod math;
mod print;
mod switch;

pub use counter::{Counter, CounterSettings};
pub use delay::{Delay, DelaySettings};
pub use math::{Add, Scale, ScaleSettings};
pub use print::{Print, PrintSettings};
pub use switch::{Switch, SwitchSettings};

use crate::runtime::registry::NodeRegistry;

/// Register every built-in node class
pub fn register_builtin(registry: &mut NodeRegistry) {
    registry
        .register::<Counter>()
        .register::<Scale>()
        .register::<Add>()
        .register::<Switch>()
        .register::<Delay>()
        .register::<Print>();
}

/// Drives a single node call outside of any computer
#[cfg(test)]
pub(crate) mod harness {
    use serde_json::Value;
    use std::collections::BTreeMap;

    use crate::runtime::bridge::{BridgeReceiver, LocalBridge, LocalQueue, OutputLink};
    use crate::runtime::errors::NodeResult;
    use crate::runtime::node::{Context, Inputs, Node, Step};
    use crate::runtime::pipeline::{ConnectionId, NodeId};

    /// Inputs as a node's storage would present them: optional ports default to null
    pub fn inputs(node: &dyn Node, values: Value) -> Inputs {
        let mut present = BTreeMap::new();
        let mut missing = Vec::new();
        for port in node.ports_in() {
            match values.get(port.key()) {
                Some(value) => {
                    present.insert(port.key().to_string(), value.clone());
                }
                None if port.is_optional() => {
                    present.insert(port.key().to_string(), Value::Null);
                }
                None => missing.push(port.key().to_string()),
            }
        }
        Inputs::new(present, missing)
    }

    fn capture<T>(
        node: &mut dyn Node,
        ctr: u64,
        call: impl FnOnce(&mut dyn Node, &mut Context<'_>) -> NodeResult<T>,
    ) -> NodeResult<(T, BTreeMap<String, Value>)> {
        let ports_out = node.ports_out();
        let queue = LocalQueue::default();
        let mut links = Vec::new();
        let mut receivers = Vec::new();
        for (i, port) in ports_out.iter().enumerate() {
            let (tx, rx) = LocalBridge::pair(port.key(), NodeId(0), ConnectionId(i), queue.clone());
            links.push(OutputLink {
                port: port.key().to_string(),
                conn: ConnectionId(i),
                sender: Box::new(tx),
            });
            receivers.push((port.key().to_string(), rx));
        }

        let mut ctx = Context::new("test", ctr, &ports_out, &links, None, true);
        let result = call(node, &mut ctx)?;

        let emitted = receivers
            .into_iter()
            .filter_map(|(key, rx)| rx.get(ctr).map(|value| (key, value)))
            .collect();
        Ok((result, emitted))
    }

    /// Call `process` for tick `ctr`; returns what was emitted, by port
    pub fn process(
        node: &mut dyn Node,
        ctr: u64,
        values: Value,
    ) -> NodeResult<BTreeMap<String, Value>> {
        let inputs = inputs(node, values);
        capture(node, ctr, |node, ctx| node.process(&inputs, ctx)).map(|(_, out)| out)
    }

    /// Run one producer cycle at tick `ctr`
    pub fn run(node: &mut dyn Node, ctr: u64) -> NodeResult<(Step, BTreeMap<String, Value>)> {
        capture(node, ctr, |node, ctx| node.run(ctx))
    }
}
