//! Counting producer

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::thread;
use std::time::Duration;

use crate::runtime::errors::{GraphResult, NodeResult};
use crate::runtime::node::{Context, Node, Port, PortType, Step};
use crate::runtime::registry::{NodeClass, parse_settings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterSettings {
    /// Number of values to emit; endless if unset
    pub count: Option<u64>,
    /// Pause between two values
    pub interval_ms: u64,
    pub start: f64,
    pub step: f64,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            count: None,
            interval_ms: 0,
            start: 0.0,
            step: 1.0,
        }
    }
}

/// Emits `start`, `start + step`, ... on `value`, one per tick
pub struct Counter {
    settings: CounterSettings,
    emitted: u64,
}

impl Counter {
    /// Counter emitting `count` values
    pub fn new(count: u64) -> Self {
        Self::from(CounterSettings {
            count: Some(count),
            ..Default::default()
        })
    }

    /// Counter running until stopped
    pub fn endless() -> Self {
        Self::from(CounterSettings::default())
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.settings.interval_ms = interval_ms;
        self
    }

    pub fn with_start(mut self, start: f64) -> Self {
        self.settings.start = start;
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.settings.step = step;
        self
    }

    fn exhausted(&self) -> bool {
        self.settings.count.is_some_and(|count| self.emitted >= count)
    }
}

impl From<CounterSettings> for Counter {
    fn from(settings: CounterSettings) -> Self {
        Self {
            settings,
            emitted: 0,
        }
    }
}

impl Node for Counter {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn ports_out(&self) -> Vec<Port> {
        vec![Port::new("value", PortType::number())]
    }

    fn settings(&self) -> Value {
        serde_json::to_value(&self.settings).unwrap_or_default()
    }

    fn is_producer(&self) -> bool {
        true
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> NodeResult<Step> {
        if self.exhausted() {
            return Ok(Step::Done);
        }
        if self.settings.interval_ms > 0 && self.emitted > 0 {
            thread::sleep(Duration::from_millis(self.settings.interval_ms));
        }

        let value = self.settings.start + self.settings.step * self.emitted as f64;
        ctx.emit(Value::from(value))?;
        self.emitted += 1;

        Ok(if self.exhausted() { Step::Done } else { Step::Continue })
    }

    fn on_start(&mut self) -> NodeResult {
        self.emitted = 0;
        Ok(())
    }
}

impl NodeClass for Counter {
    const CLASS: &'static str = "Counter";

    fn from_settings(settings: &Value) -> GraphResult<Self> {
        Ok(Self::from(parse_settings::<CounterSettings>(Self::CLASS, settings)?))
    }
}
