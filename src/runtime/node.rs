//! Node trait for live processing
//!
//! Defines the [`Node`] trait all processing units implement, the [`Inputs`]
//! handed to `process()` for one tick, and the [`Context`] through which a
//! node emits data while running inside a computer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

pub use super::errors::{NodeError, NodeResult};
pub use super::ports::{Port, PortType};

use super::bridge::OutputLink;
use super::ports::find_port;

/// Outcome of one producer cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More data will follow
    Continue,
    /// The producer is exhausted; its outputs get closed
    Done,
}

/// A frame handed to the rendering collaborator via [`Context::emit_draw`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawFrame {
    pub node: String,
    pub ctr: u64,
    pub value: Value,
}

/// Channel end receiving draw frames
pub type DrawSink = crossbeam_channel::Sender<DrawFrame>;

/// A processing node
///
/// - Producers have no inputs and generate data in [`run`](Node::run)
/// - Processors react to inputs in [`process`](Node::process) and may emit
/// - Sinks react to inputs and emit nothing
///
/// `process` must not block for unbounded time: every node sharing a
/// location runs on the same event loop.
pub trait Node: Send {
    /// Class name used by the registry and in saved pipelines
    fn class(&self) -> &str;

    fn ports_in(&self) -> Vec<Port> {
        Vec::new()
    }

    fn ports_out(&self) -> Vec<Port> {
        Vec::new()
    }

    /// Settings needed to reconstruct this node through the registry
    fn settings(&self) -> Value {
        Value::Object(Default::default())
    }

    /// Producers are driven through `run()` instead of `process()`
    fn is_producer(&self) -> bool {
        false
    }

    /// Decide whether the inputs buffered for the current tick are enough.
    ///
    /// Default: every non-optional input port has a value.
    fn should_process(&self, inputs: &Inputs) -> bool {
        inputs.has_required()
    }

    /// Handle the inputs of one tick
    fn process(&mut self, _inputs: &Inputs, _ctx: &mut Context<'_>) -> NodeResult {
        Ok(())
    }

    /// Generate one cycle of data (producers only)
    fn run(&mut self, _ctx: &mut Context<'_>) -> NodeResult<Step> {
        Ok(Step::Done)
    }

    fn on_start(&mut self) -> NodeResult {
        Ok(())
    }

    fn on_stop(&mut self) {}
}

/// Values available to a node for one tick, keyed by input port
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inputs {
    values: BTreeMap<String, Value>,
    missing_required: Vec<String>,
}

impl Inputs {
    pub fn new(values: BTreeMap<String, Value>, missing_required: Vec<String>) -> Self {
        Self {
            values,
            missing_required,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Whether every non-optional port delivered a value
    pub fn has_required(&self) -> bool {
        self.missing_required.is_empty()
    }

    /// Required ports without a value for this tick
    pub fn missing(&self) -> &[String] {
        &self.missing_required
    }

    /// Fetch a required input, failing with [`NodeError::MissingInput`]
    pub fn require(&self, key: &str) -> NodeResult<&Value> {
        self.get(key)
            .ok_or_else(|| NodeError::MissingInput(key.to_string()))
    }

    /// Fetch an input as a number
    pub fn number(&self, key: &str) -> NodeResult<f64> {
        let value = self.require(key)?;
        value.as_f64().ok_or_else(|| NodeError::InvalidValue {
            port: key.to_string(),
            reason: format!("expected number, got {}", value),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Emission context handed to a node while it runs one tick
pub struct Context<'a> {
    node: &'a str,
    ctr: u64,
    ports_out: &'a [Port],
    outputs: &'a [OutputLink],
    draw: Option<&'a DrawSink>,
    check_values: bool,
    emitted: usize,
}

impl<'a> Context<'a> {
    pub fn new(
        node: &'a str,
        ctr: u64,
        ports_out: &'a [Port],
        outputs: &'a [OutputLink],
        draw: Option<&'a DrawSink>,
        check_values: bool,
    ) -> Self {
        Self {
            node,
            ctr,
            ports_out,
            outputs,
            draw,
            check_values,
            emitted: 0,
        }
    }

    /// Name of the node being driven
    pub fn node_name(&self) -> &str {
        self.node
    }

    /// Tick every emission of this call is tagged with
    pub fn ctr(&self) -> u64 {
        self.ctr
    }

    /// Number of values emitted so far in this call
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Emit on the node's first output port
    pub fn emit(&mut self, value: Value) -> NodeResult {
        let channel = self
            .ports_out
            .first()
            .map(|p| p.key().to_string())
            .ok_or_else(|| NodeError::UnknownOutput("<default>".to_string()))?;
        self.emit_to(&channel, value)
    }

    /// Emit on the output port `channel`, to every connection bound to it
    pub fn emit_to(&mut self, channel: &str, value: Value) -> NodeResult {
        let port = find_port(self.ports_out, channel)
            .ok_or_else(|| NodeError::UnknownOutput(channel.to_string()))?;

        if self.check_values
            && let Err(reason) = port.check_value(&value)
        {
            warn!(
                "[{}] emitted value on '{}' does not match {}: {}",
                self.node,
                channel,
                port.port_type().name(),
                reason
            );
        }

        for link in self.outputs.iter().filter(|l| l.port == channel) {
            link.sender.put(self.ctr, value.clone())?;
        }
        self.emitted += 1;
        Ok(())
    }

    /// Hand a value to the rendering collaborator, if one is listening
    pub fn emit_draw(&mut self, value: Value) {
        if let Some(draw) = self.draw {
            let _ = draw.send(DrawFrame {
                node: self.node.to_string(),
                ctr: self.ctr,
                value,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inputs_accessors() {
        let mut values = BTreeMap::new();
        values.insert("a".to_string(), json!(2.5));
        values.insert("label".to_string(), json!("x"));
        let inputs = Inputs::new(values, vec!["b".to_string()]);

        assert!(!inputs.has_required());
        assert_eq!(inputs.missing(), &["b".to_string()]);
        assert_eq!(inputs.number("a").unwrap(), 2.5);
        assert!(matches!(inputs.number("b"), Err(NodeError::MissingInput(_))));
        assert!(matches!(
            inputs.number("label"),
            Err(NodeError::InvalidValue { .. })
        ));
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_emit_to_unknown_port_fails() {
        let ports = vec![Port::new("out", PortType::number())];
        let mut ctx = Context::new("n", 1, &ports, &[], None, false);
        assert!(matches!(
            ctx.emit_to("nope", json!(1)),
            Err(NodeError::UnknownOutput(_))
        ));
        // unconnected but declared output is fine
        ctx.emit(json!(1)).unwrap();
        assert_eq!(ctx.emitted(), 1);
    }

    #[test]
    fn test_emit_draw_tags_frame() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut ctx = Context::new("plot", 7, &[], &[], Some(&tx), false);
        ctx.emit_draw(json!([1, 2]));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.node, "plot");
        assert_eq!(frame.ctr, 7);
        assert_eq!(frame.value, json!([1, 2]));
    }
}
