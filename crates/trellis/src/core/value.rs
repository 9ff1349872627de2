//! Dynamic values flowing through fields, handler arguments, snapshots and
//! style templates.

use std::{
    collections::{BTreeMap, HashMap},
    result::Result as StdResult,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use slotmap::Key;

use crate::core::{
    NodeId,
    error::{Error, Result},
};

/// Creation props and other string-keyed value maps.
pub type Props = BTreeMap<String, Value>;

/// Canonical dynamic representation for field values, handler arguments and
/// snapshots.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    /// Null value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// Array value.
    Array(Vec<Self>),
    /// Map value.
    Map(BTreeMap<String, Self>),
    /// Reference to a node in the tree.
    Node(NodeId),
}

impl Value {
    /// Human-readable variant name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Array(_) => "Array",
            Self::Map(_) => "Map",
            Self::Node(_) => "Node",
        }
    }

    /// Is this the null value?
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Boolean content, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer content, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric content, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Array content, if this is an array.
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Map content, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Node reference, if this is a node.
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(v) => Some(*v),
            _ => None,
        }
    }

    /// Look up a key in a map value.
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Loose truthiness: null, false, zero and the empty string are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(v) => *v,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0 && !v.is_nan(),
            Self::String(v) => !v.is_empty(),
            Self::Array(_) | Self::Map(_) | Self::Node(_) => true,
        }
    }

    /// Render the value as it appears when spliced into CSS text.
    pub fn to_css_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => format!("{}", *v as i64),
            Self::Float(v) => v.to_string(),
            Self::String(v) => v.clone(),
            Self::Array(v) => v
                .iter()
                .map(Self::to_css_string)
                .collect::<Vec<_>>()
                .join(","),
            Self::Map(_) | Self::Node(_) => self.to_json().to_string(),
        }
    }

    /// Convert into a JSON value. Non-finite floats become null, node
    /// references become their arena key.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::Number(JsonNumber::from(*v)),
            Self::Float(v) => JsonNumber::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number),
            Self::String(v) => JsonValue::String(v.clone()),
            Self::Array(values) => JsonValue::Array(values.iter().map(Self::to_json).collect()),
            Self::Map(values) => {
                let mut map = JsonMap::new();
                for (key, value) in values {
                    map.insert(key.clone(), value.to_json());
                }
                JsonValue::Object(map)
            }
            Self::Node(id) => JsonValue::String(format!("node:{}", id.data().as_ffi())),
        }
    }

    /// Convert a JSON value.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(v),
            JsonValue::Number(v) => match v.as_i64() {
                Some(i) => Self::Int(i),
                None => v.as_f64().map_or(Self::Null, Self::Float),
            },
            JsonValue::String(v) => Self::String(v),
            JsonValue::Array(values) => {
                Self::Array(values.into_iter().map(Self::from_json).collect())
            }
            JsonValue::Object(values) => Self::Map(
                values
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Decode a typed value.
    pub fn decode<T: FromValue>(&self) -> Result<T> {
        T::from_value(self)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> StdResult<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Self::from_json)
    }
}

/// Convert a typed value into a Value.
pub trait ToValue {
    /// Encode the value as a Value.
    fn to_value(self) -> Value;
}

/// Convert a Value into a typed value.
pub trait FromValue: Sized {
    /// Decode the value from a Value.
    fn from_value(v: &Value) -> Result<Self>;
}

impl ToValue for Value {
    fn to_value(self) -> Value {
        self
    }
}

impl ToValue for &Value {
    fn to_value(self) -> Value {
        self.clone()
    }
}

impl ToValue for bool {
    fn to_value(self) -> Value {
        Value::Bool(self)
    }
}

impl ToValue for String {
    fn to_value(self) -> Value {
        Value::String(self)
    }
}

impl ToValue for &str {
    fn to_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToValue for f64 {
    fn to_value(self) -> Value {
        Value::Float(self)
    }
}

impl ToValue for NodeId {
    fn to_value(self) -> Value {
        Value::Node(self)
    }
}

/// Implement `ToValue` for integer primitives that widen losslessly.
macro_rules! impl_int_to_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToValue for $ty {
                fn to_value(self) -> Value {
                    Value::Int(i64::from(self))
                }
            }
        )+
    };
}

impl_int_to_value!(i8, i16, i32, i64, u8, u16, u32);

impl ToValue for usize {
    fn to_value(self) -> Value {
        i64::try_from(self).map_or(Value::Float(self as f64), Value::Int)
    }
}

impl<T> ToValue for Option<T>
where
    T: ToValue,
{
    fn to_value(self) -> Value {
        match self {
            Some(value) => value.to_value(),
            None => Value::Null,
        }
    }
}

impl<T> ToValue for Vec<T>
where
    T: ToValue,
{
    fn to_value(self) -> Value {
        Value::Array(self.into_iter().map(ToValue::to_value).collect())
    }
}

impl<T> ToValue for BTreeMap<String, T>
where
    T: ToValue,
{
    fn to_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k, v.to_value()))
                .collect(),
        )
    }
}

impl<T> ToValue for HashMap<String, T>
where
    T: ToValue,
{
    fn to_value(self) -> Value {
        let mut out = BTreeMap::new();
        for (key, value) in self {
            out.insert(key, value.to_value());
        }
        Value::Map(out)
    }
}

impl ToValue for () {
    fn to_value(self) -> Value {
        Value::Null
    }
}

/// Implement `From` for the common scalar conversions.
macro_rules! impl_from_for_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    value.to_value()
                }
            }
        )+
    };
}

impl_from_for_value!(bool, String, &str, i32, i64, f64, NodeId);

/// Build a type mismatch error.
fn mismatch(expected: &'static str, got: &Value) -> Error {
    Error::TypeMismatch {
        expected,
        got: got.kind_name(),
    }
}

impl FromValue for Value {
    fn from_value(v: &Value) -> Result<Self> {
        Ok(v.clone())
    }
}

impl FromValue for bool {
    fn from_value(v: &Value) -> Result<Self> {
        v.as_bool().ok_or_else(|| mismatch("bool", v))
    }
}

impl FromValue for String {
    fn from_value(v: &Value) -> Result<Self> {
        v.as_str().map(str::to_string).ok_or_else(|| mismatch("String", v))
    }
}

impl FromValue for i64 {
    fn from_value(v: &Value) -> Result<Self> {
        v.as_int().ok_or_else(|| mismatch("i64", v))
    }
}

impl FromValue for f64 {
    fn from_value(v: &Value) -> Result<Self> {
        v.as_float().ok_or_else(|| mismatch("f64", v))
    }
}

impl FromValue for NodeId {
    fn from_value(v: &Value) -> Result<Self> {
        v.as_node().ok_or_else(|| mismatch("Node", v))
    }
}

impl<T> FromValue for Option<T>
where
    T: FromValue,
{
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::Null => Ok(None),
            _ => T::from_value(v).map(Some),
        }
    }
}

impl<T> FromValue for Vec<T>
where
    T: FromValue,
{
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::Array(values) => values.iter().map(T::from_value).collect(),
            other => Err(mismatch("Vec", other)),
        }
    }
}

impl<T> FromValue for BTreeMap<String, T>
where
    T: FromValue,
{
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::Map(values) => values
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_value(v)?)))
                .collect(),
            other => Err(mismatch("Map", other)),
        }
    }
}

/// Build a [`Props`] map from `key: value` pairs.
#[macro_export]
macro_rules! props {
    () => {
        $crate::Props::new()
    };
    ($($key:ident : $value:expr),+ $(,)?) => {{
        let mut map = $crate::Props::new();
        $(
            map.insert(
                ::std::string::ToString::to_string(stringify!($key)),
                $crate::value::ToValue::to_value($value),
            );
        )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn json_interop() {
        let value = Value::from_json(serde_json::json!({
            "a": [1, 2.5, "x", null],
            "b": {"c": true}
        }));
        let a = value.get("a").and_then(Value::as_array).unwrap();
        assert_eq!(a[0], Value::Int(1));
        assert_eq!(a[1], Value::Float(2.5));
        assert_eq!(a[3], Value::Null);
        assert_eq!(
            value.get("b").and_then(|b| b.get("c")),
            Some(&Value::Bool(true))
        );
        assert_eq!(Value::from_json(value.to_json()), value);
    }

    #[test]
    fn css_strings() {
        assert_eq!(Value::Null.to_css_string(), "");
        assert_eq!(Value::Float(2.0).to_css_string(), "2");
        assert_eq!(Value::Float(1.5).to_css_string(), "1.5");
        assert_eq!(
            Value::Array(vec!["a".into(), "b".into()]).to_css_string(),
            "a,b"
        );
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::Int(3).is_truthy());
        assert!(Value::Map(BTreeMap::new()).is_truthy());
    }

    #[test]
    fn props_macro() {
        let p = props! { count: 3, label: "go", open: true };
        assert_eq!(p.get("count"), Some(&Value::Int(3)));
        assert_eq!(p.get("label"), Some(&Value::String("go".into())));
        assert_eq!(p.get("open"), Some(&Value::Bool(true)));
        assert!(props! {}.is_empty());
    }

    #[test]
    fn decode_mismatch() {
        let err = Value::Int(1).decode::<String>().unwrap_err();
        assert_eq!(err.to_string(), "type mismatch: expected String, got Int");
        let v: Option<i64> = Value::Null.decode().unwrap();
        assert_eq!(v, None);
    }
}
