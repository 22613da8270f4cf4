//! Explicit node-class registry
//!
//! Saved pipelines and worker processes rebuild nodes from a class name and
//! a settings object. The mapping from class name to constructor lives in a
//! [`NodeRegistry`] value handed to whoever needs it; there is no global.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::errors::{GraphError, GraphResult};
use super::node::Node;

/// Builds a node from its settings
pub type Constructor = Arc<dyn Fn(&Value) -> GraphResult<Box<dyn Node>> + Send + Sync>;

/// A node type constructible from settings
pub trait NodeClass: Node + Sized + 'static {
    /// Name stored in saved pipelines
    const CLASS: &'static str;

    fn from_settings(settings: &Value) -> GraphResult<Self>;
}

/// Parse a settings object into a typed settings struct
pub fn parse_settings<T: serde::de::DeserializeOwned>(
    class: &str,
    settings: &Value,
) -> GraphResult<T> {
    let settings = match settings {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(settings).map_err(|e| GraphError::InvalidSettings {
        class: class.to_string(),
        reason: e.to_string(),
    })
}

/// Class name to constructor lookup
#[derive(Clone, Default)]
pub struct NodeRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in nodes
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtin(&mut registry);
        registry
    }

    /// Register a node type under its class name
    pub fn register<N: NodeClass>(&mut self) -> &mut Self {
        self.register_fn(N::CLASS, |settings| {
            Ok(Box::new(N::from_settings(settings)?) as Box<dyn Node>)
        })
    }

    /// Register a constructor closure under `class`
    pub fn register_fn<F>(&mut self, class: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&Value) -> GraphResult<Box<dyn Node>> + Send + Sync + 'static,
    {
        self.constructors.insert(class.into(), Arc::new(constructor));
        self
    }

    pub fn lookup(&self, class: &str) -> Option<&Constructor> {
        self.constructors.get(class)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.constructors.contains_key(class)
    }

    /// Build a node of `class` from `settings`
    pub fn construct(&self, class: &str, settings: &Value) -> GraphResult<Box<dyn Node>> {
        let constructor = self
            .lookup(class)
            .ok_or_else(|| GraphError::UnknownClass(class.to_string()))?;
        constructor(settings)
    }

    /// Registered class names, sorted
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ports::{Port, PortType};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct GainSettings {
        gain: f64,
    }

    struct Gain {
        gain: f64,
    }

    impl Node for Gain {
        fn class(&self) -> &str {
            Self::CLASS
        }
        fn ports_in(&self) -> Vec<Port> {
            vec![Port::new("in", PortType::number())]
        }
        fn settings(&self) -> Value {
            json!({ "gain": self.gain })
        }
    }

    impl NodeClass for Gain {
        const CLASS: &'static str = "Gain";

        fn from_settings(settings: &Value) -> GraphResult<Self> {
            let s: GainSettings = parse_settings(Self::CLASS, settings)?;
            Ok(Self { gain: s.gain })
        }
    }

    #[test]
    fn test_register_and_construct() {
        let mut registry = NodeRegistry::new();
        registry.register::<Gain>();

        let node = registry.construct("Gain", &json!({ "gain": 2.0 })).unwrap();
        assert_eq!(node.class(), "Gain");
        assert_eq!(node.settings(), json!({ "gain": 2.0 }));
        assert_eq!(registry.classes().collect::<Vec<_>>(), vec!["Gain"]);
    }

    #[test]
    fn test_unknown_class() {
        let registry = NodeRegistry::new();
        assert!(matches!(
            registry.construct("Nope", &json!({})),
            Err(GraphError::UnknownClass(_))
        ));
    }

    #[test]
    fn test_missing_settings() {
        let mut registry = NodeRegistry::new();
        registry.register::<Gain>();
        let err = registry.construct("Gain", &json!({})).err().expect("expected construct to fail");
        assert!(matches!(err, GraphError::InvalidSettings { .. }));
        assert!(err.to_string().contains("gain"));
    }

    #[test]
    fn test_register_fn() {
        let mut registry = NodeRegistry::new();
        registry.register_fn("Fixed", |_| Ok(Box::new(Gain { gain: 3.0 }) as Box<dyn Node>));
        assert!(registry.contains("Fixed"));
        let node = registry.construct("Fixed", &Value::Null).unwrap();
        assert_eq!(node.settings(), json!({ "gain": 3.0 }));
    }

    #[test]
    fn test_builtin_classes() {
        let registry = NodeRegistry::with_builtin();
        for class in ["Counter", "Scale", "Add", "Switch", "Delay", "Print"] {
            assert!(registry.contains(class), "{} missing", class);
        }
    }
}
