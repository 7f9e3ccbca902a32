//! Value marshalling across the host/script boundary
//!
//! Only four primitive types cross the boundary: boolean, 32-bit integer,
//! double, and string. Anything else is rejected when a capability is bound,
//! so a call never meets an unsupported type at runtime.

use rquickjs::{Coerced, Ctx, FromJs};
use std::fmt;

type JsValue<'js> = rquickjs::Value<'js>;

/// Type tag of a method parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Boolean,
    Int32,
    Double,
    String,
    /// Return-only: the method produces no value.
    Void,
    /// Any host type the bridge cannot marshal, by name.
    Other(String),
}

impl TypeTag {
    pub fn other(name: impl Into<String>) -> Self {
        TypeTag::Other(name.into())
    }

    /// Whether values of this type may be passed as arguments.
    pub fn is_parameter(&self) -> bool {
        matches!(
            self,
            TypeTag::Boolean | TypeTag::Int32 | TypeTag::Double | TypeTag::String
        )
    }

    /// Whether a method may declare this as its return type.
    pub fn is_return(&self) -> bool {
        self.is_parameter() || *self == TypeTag::Void
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Boolean => f.write_str("boolean"),
            TypeTag::Int32 => f.write_str("int"),
            TypeTag::Double => f.write_str("double"),
            TypeTag::String => f.write_str("string"),
            TypeTag::Void => f.write_str("void"),
            TypeTag::Other(name) => f.write_str(name),
        }
    }
}

/// A host-side value that can cross the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int32(i32),
    Double(f64),
    String(String),
    Void,
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Boolean(_) => TypeTag::Boolean,
            Value::Int32(_) => TypeTag::Int32,
            Value::Double(_) => TypeTag::Double,
            Value::String(_) => TypeTag::String,
            Value::Void => TypeTag::Void,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Void
    }
}

/// Convert a host value into the engine's native representation.
pub(crate) fn to_js<'js>(ctx: &Ctx<'js>, value: &Value) -> rquickjs::Result<JsValue<'js>> {
    Ok(match value {
        Value::Boolean(value) => JsValue::new_bool(ctx.clone(), *value),
        Value::Int32(value) => JsValue::new_int(ctx.clone(), *value),
        // Keep the float tag so -0.0 survives the trip.
        Value::Double(value) => JsValue::new_float(ctx.clone(), *value),
        Value::String(value) => rquickjs::String::from_str(ctx.clone(), value)?.into_value(),
        Value::Void => JsValue::new_undefined(ctx.clone()),
    })
}

/// Convert a script value into the declared host type.
///
/// No coercion: on mismatch the script-side type name is returned. Integers
/// accept only integral numbers within `i32` range.
pub(crate) fn from_js(value: &JsValue<'_>, expected: &TypeTag) -> Result<Value, &'static str> {
    let converted = match expected {
        TypeTag::Boolean => value.as_bool().map(Value::Boolean),
        TypeTag::Int32 => value
            .as_int()
            .or_else(|| value.as_float().and_then(exact_i32))
            .map(Value::Int32),
        TypeTag::Double => value.as_number().map(Value::Double),
        TypeTag::String => value
            .as_string()
            .and_then(|string| string.to_string().ok())
            .map(Value::String),
        TypeTag::Void | TypeTag::Other(_) => None,
    };
    converted.ok_or_else(|| value.type_name())
}

/// Render any script value as text using the engine's ToString coercion.
pub(crate) fn stringify<'js>(ctx: &Ctx<'js>, value: JsValue<'js>) -> rquickjs::Result<String> {
    Coerced::<String>::from_js(ctx, value).map(|coerced| coerced.0)
}

fn exact_i32(number: f64) -> Option<i32> {
    let in_range = number >= f64::from(i32::MIN) && number <= f64::from(i32::MAX);
    (in_range && number.fract() == 0.0).then_some(number as i32)
}
