//! The dynamically-typed value used for custom attributes, flag variations, fallback values and
//! track payloads.
use std::fmt;

use derive_more::From;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Object representation of a [`Value`]. Iteration follows insertion order.
pub type Object = IndexMap<String, Value>;

/// A JSON-like value.
///
/// Values are immutable once built. Arrays and objects can be assembled with [`ArrayBuilder`] and
/// [`ObjectBuilder`], or converted from `serde_json::Value`.
///
/// # Examples
/// ```
/// # use ld_server_core::{ObjectBuilder, Value};
/// let value = ObjectBuilder::new()
///     .set("plan", "gold")
///     .set("seats", 3)
///     .build();
/// assert_eq!(value.get("plan").and_then(Value::as_str), Some("gold"));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum Value {
    /// Absence of value.
    #[default]
    Null,
    #[allow(missing_docs)]
    Bool(bool),
    /// All numbers are double precision.
    Number(f64),
    #[allow(missing_docs)]
    String(String),
    #[allow(missing_docs)]
    Array(Vec<Value>),
    /// Keys are unique; setting an existing key replaces its value.
    Object(Object),
}

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        })
    }
}

impl Value {
    /// Return the type tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    #[allow(missing_docs)]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[allow(missing_docs)]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the number truncated towards zero. Fractional numbers are not rejected; flags
    /// declared as integers may still be served as doubles by older services.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|n| n as i64)
    }

    #[allow(missing_docs)]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns array elements in index order.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns object entries in insertion order.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a property of an object value. Returns `None` for non-objects.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?.get(key)
    }

    /// Convert to `serde_json::Value`. Non-finite numbers become `null` as JSON cannot represent
    /// them.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    fn type_error(&self, expected: ValueKind) -> Error {
        Error::ValueType {
            expected,
            found: self.kind(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(value.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        value.to_json()
    }
}

impl TryFrom<&Value> for bool {
    type Error = Error;

    fn try_from(value: &Value) -> Result<bool> {
        value
            .as_bool()
            .ok_or_else(|| value.type_error(ValueKind::Bool))
    }
}

impl TryFrom<&Value> for f64 {
    type Error = Error;

    fn try_from(value: &Value) -> Result<f64> {
        value
            .as_f64()
            .ok_or_else(|| value.type_error(ValueKind::Number))
    }
}

impl TryFrom<&Value> for i64 {
    type Error = Error;

    fn try_from(value: &Value) -> Result<i64> {
        value
            .as_i64()
            .ok_or_else(|| value.type_error(ValueKind::Number))
    }
}

impl TryFrom<&Value> for String {
    type Error = Error;

    fn try_from(value: &Value) -> Result<String> {
        value
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| value.type_error(ValueKind::String))
    }
}

/// Accumulates elements and seals them into an array [`Value`].
#[derive(Debug, Default)]
pub struct ArrayBuilder {
    items: Vec<Value>,
}

impl ArrayBuilder {
    #[allow(missing_docs)]
    pub fn new() -> ArrayBuilder {
        ArrayBuilder::default()
    }

    /// Append an element.
    pub fn push(mut self, value: impl Into<Value>) -> ArrayBuilder {
        self.items.push(value.into());
        self
    }

    /// Seal into an immutable value.
    pub fn build(self) -> Value {
        Value::Array(self.items)
    }
}

/// Accumulates properties and seals them into an object [`Value`].
///
/// Setting the same key twice keeps the last value.
#[derive(Debug, Default)]
pub struct ObjectBuilder {
    entries: Object,
}

impl ObjectBuilder {
    #[allow(missing_docs)]
    pub fn new() -> ObjectBuilder {
        ObjectBuilder::default()
    }

    /// Set a property, replacing any earlier value for the same key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> ObjectBuilder {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Seal into an immutable value.
    pub fn build(self) -> Value {
        Value::Object(self.entries)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn nested() -> Value {
        ObjectBuilder::new()
            .set("empty_array", ArrayBuilder::new().build())
            .set("empty_object", ObjectBuilder::new().build())
            .set(
                "a",
                ObjectBuilder::new()
                    .set(
                        "b",
                        ArrayBuilder::new()
                            .push(
                                ObjectBuilder::new()
                                    .set(
                                        "c",
                                        ArrayBuilder::new().push(Value::Null).push(true).build(),
                                    )
                                    .build(),
                            )
                            .push(1.5)
                            .push("text")
                            .build(),
                    )
                    .build(),
            )
            .build()
    }

    #[test]
    fn survives_serialization() {
        for value in [
            Value::Null,
            Value::Bool(false),
            Value::Number(-12.25),
            Value::from("hello"),
            ArrayBuilder::new().build(),
            ObjectBuilder::new().build(),
            nested(),
        ] {
            let text = serde_json::to_string(&value).unwrap();
            let parsed: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, value, "{text}");
        }
    }

    #[test]
    fn integers_deserialize_as_numbers() {
        let value: Value = serde_json::from_str("[1, -2, 3.5]").unwrap();
        assert_eq!(
            value,
            Value::Array(vec![1.into(), (-2).into(), 3.5.into()])
        );
    }

    #[test]
    fn object_keeps_insertion_order_and_last_write() {
        let value = ObjectBuilder::new()
            .set("z", 1)
            .set("a", 2)
            .set("z", 3)
            .build();
        let entries: Vec<_> = value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_f64().unwrap()))
            .collect();
        assert_eq!(entries, vec![("z", 3.0), ("a", 2.0)]);
    }

    #[test]
    fn typed_extraction_reports_mismatch() {
        let value = Value::from("gold");
        assert_eq!(String::try_from(&value).unwrap(), "gold");
        match bool::try_from(&value) {
            Err(Error::ValueType { expected, found }) => {
                assert_eq!(expected, ValueKind::Bool);
                assert_eq!(found, ValueKind::String);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(value.as_f64(), None);
    }

    #[test]
    fn converts_from_and_to_serde_json() {
        let json = json!({"a": [1, "x", null, {"b": false}]});
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json);
        assert_eq!(
            value.get("a").and_then(Value::as_array).map(<[Value]>::len),
            Some(4)
        );
    }

    #[test]
    fn non_finite_numbers_become_null_json() {
        assert_eq!(Value::Number(f64::NAN).to_json(), serde_json::Value::Null);
    }
}
