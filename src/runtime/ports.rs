//! Port descriptors and value-compatibility rules
//!
//! A [`Port`] is a keyed endpoint on a node. Its [`PortType`] carries example
//! values plus a predicate deciding whether a value belongs to the type;
//! connection compatibility is derived from those two pieces.

use serde_json::{Value, json};
use std::fmt;

type CheckFn = fn(&Value) -> Result<(), String>;
type ExamplesFn = fn() -> Vec<Value>;

/// Value type accepted or produced by a port
#[derive(Clone, Copy)]
pub struct PortType {
    name: &'static str,
    examples: ExamplesFn,
    check: CheckFn,
}

impl PortType {
    /// Define a custom port type
    pub const fn new(name: &'static str, examples: ExamplesFn, check: CheckFn) -> Self {
        Self {
            name,
            examples,
            check,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn examples(&self) -> Vec<Value> {
        (self.examples)()
    }

    /// Check whether `value` belongs to this type, with a reason if not
    pub fn check_value(&self, value: &Value) -> Result<(), String> {
        (self.check)(value)
    }

    /// Whether data of this type may feed a port of type `recv`.
    ///
    /// Exact type match, or every example of this type passes `recv`'s check.
    pub fn can_input_to(&self, recv: &PortType) -> bool {
        if self.name == recv.name {
            return true;
        }
        let examples = self.examples();
        !examples.is_empty() && examples.iter().all(|v| recv.check_value(v).is_ok())
    }

    /// Accepts everything
    pub fn any() -> Self {
        Self::new("any", || vec![json!(null), json!(1), json!("x")], |_| Ok(()))
    }

    pub fn number() -> Self {
        Self::new("number", || vec![json!(0), json!(1.5), json!(-3)], |v| {
            if v.is_number() {
                Ok(())
            } else {
                Err(format!("expected number, got {}", v))
            }
        })
    }

    /// Integers only; feeds any `number` port
    pub fn integer() -> Self {
        Self::new("integer", || vec![json!(0), json!(7), json!(-2)], |v| {
            if v.is_i64() || v.is_u64() {
                Ok(())
            } else {
                Err(format!("expected integer, got {}", v))
            }
        })
    }

    pub fn boolean() -> Self {
        Self::new("boolean", || vec![json!(true), json!(false)], |v| {
            if v.is_boolean() {
                Ok(())
            } else {
                Err(format!("expected boolean, got {}", v))
            }
        })
    }

    pub fn text() -> Self {
        Self::new("text", || vec![json!(""), json!("hello")], |v| {
            if v.is_string() {
                Ok(())
            } else {
                Err(format!("expected string, got {}", v))
            }
        })
    }

    /// A flat list of numbers (a signal window)
    pub fn number_list() -> Self {
        Self::new("number_list", || vec![json!([]), json!([1.0, 2.0, 3.0])], |v| {
            match v.as_array() {
                Some(items) if items.iter().all(Value::is_number) => Ok(()),
                Some(_) => Err("expected only numbers in list".to_string()),
                None => Err(format!("expected list, got {}", v)),
            }
        })
    }
}

impl fmt::Debug for PortType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PortType({})", self.name)
    }
}

impl PartialEq for PortType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// A keyed, typed endpoint on a node.
///
/// `key` identifies the port within its node's input or output set and is
/// fixed at construction; `label` is for display only.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    key: String,
    label: String,
    optional: bool,
    ty: PortType,
}

impl Port {
    pub fn new(key: impl Into<String>, ty: PortType) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
            optional: false,
            ty,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Mark the port as optional: processing does not wait for it
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn port_type(&self) -> PortType {
        self.ty
    }

    pub fn check_value(&self, value: &Value) -> Result<(), String> {
        self.ty.check_value(value)
    }

    pub fn can_input_to(&self, recv: &Port) -> bool {
        self.ty.can_input_to(&recv.ty)
    }
}

/// Find a port by key
pub fn find_port<'a>(ports: &'a [Port], key: &str) -> Option<&'a Port> {
    ports.iter().find(|p| p.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_type_match() {
        assert!(PortType::boolean().can_input_to(&PortType::boolean()));
        assert!(PortType::number_list().can_input_to(&PortType::number_list()));
    }

    #[test]
    fn test_examples_accepted_by_receiver() {
        // every integer example is a number
        assert!(PortType::integer().can_input_to(&PortType::number()));
        assert!(PortType::number().can_input_to(&PortType::any()));
        // but 1.5 is not an integer
        assert!(!PortType::number().can_input_to(&PortType::integer()));
    }

    #[test]
    fn test_incompatible() {
        assert!(!PortType::text().can_input_to(&PortType::number()));
        assert!(!PortType::any().can_input_to(&PortType::boolean()));
    }

    #[test]
    fn test_check_value_reason() {
        let port = Port::new("data", PortType::number_list());
        assert!(port.check_value(&json!([1, 2])).is_ok());
        let err = port.check_value(&json!("nope")).unwrap_err();
        assert!(err.contains("expected list"));
    }

    #[test]
    fn test_builder() {
        let port = Port::new("toggle", PortType::boolean())
            .with_label("Toggle")
            .optional();
        assert_eq!(port.key(), "toggle");
        assert_eq!(port.label(), "Toggle");
        assert!(port.is_optional());
        assert_eq!(port.port_type().name(), "boolean");
    }
}
