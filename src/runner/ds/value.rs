use std::fmt;
use std::fmt::{Display, Formatter};

use crate::engine::RawValue;

pub const TYPE_STR_UNDEFINED: &str = "undefined";
pub const TYPE_STR_NULL: &str = "null";
pub const TYPE_STR_BOOLEAN: &str = "boolean";
pub const TYPE_STR_NUMBER: &str = "number";
pub const TYPE_STR_STRING: &str = "string";
pub const TYPE_STR_SYMBOL: &str = "symbol";
pub const TYPE_STR_OBJECT: &str = "object";
pub const TYPE_STR_FUNCTION: &str = "function";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    ArrayBuffer,
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl BufferType {
    pub fn element_size(&self) -> usize {
        match self {
            BufferType::ArrayBuffer
            | BufferType::Int8
            | BufferType::Uint8
            | BufferType::Uint8Clamped => 1,
            BufferType::Int16 | BufferType::Uint16 => 2,
            BufferType::Int32 | BufferType::Uint32 | BufferType::Float32 => 4,
            BufferType::Float64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BufferType::ArrayBuffer => "ArrayBuffer",
            BufferType::Int8 => "Int8Array",
            BufferType::Uint8 => "Uint8Array",
            BufferType::Uint8Clamped => "Uint8ClampedArray",
            BufferType::Int16 => "Int16Array",
            BufferType::Uint16 => "Uint16Array",
            BufferType::Int32 => "Int32Array",
            BufferType::Uint32 => "Uint32Array",
            BufferType::Float32 => "Float32Array",
            BufferType::Float64 => "Float64Array",
        }
    }
}

/// The flavour of an object value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Plain,
    Array,
    Function,
    Error,
    Buffer(BufferType),
}

/// A snapshot of an engine value's type and, for primitives, its contents.
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Carries the symbol's description.
    Symbol(String),
    Object(ObjectClass),
}

impl JsValue {
    /// The `typeof` name of the value.
    pub fn type_name(&self) -> &'static str {
        match self {
            JsValue::Undefined => TYPE_STR_UNDEFINED,
            JsValue::Null => TYPE_STR_NULL,
            JsValue::Boolean(_) => TYPE_STR_BOOLEAN,
            JsValue::Number(_) => TYPE_STR_NUMBER,
            JsValue::String(_) => TYPE_STR_STRING,
            JsValue::Symbol(_) => TYPE_STR_SYMBOL,
            JsValue::Object(ObjectClass::Function) => TYPE_STR_FUNCTION,
            JsValue::Object(_) => TYPE_STR_OBJECT,
        }
    }

    /// Objects and functions; the things a debugger can expand.
    pub fn is_object_like(&self) -> bool {
        matches!(self, JsValue::Object(_))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, JsValue::Undefined | JsValue::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, JsValue::Object(ObjectClass::Function))
    }
}

impl Display for JsValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Undefined => write!(f, "{}", TYPE_STR_UNDEFINED),
            JsValue::Null => write!(f, "{}", TYPE_STR_NULL),
            JsValue::Boolean(b) => write!(f, "{}", b),
            JsValue::Number(n) => write!(f, "{}", format_number(*n)),
            JsValue::String(s) => write!(f, "\"{}\"", s),
            JsValue::Symbol(s) => write!(f, "Symbol({})", s),
            JsValue::Object(ObjectClass::Function) => write!(f, "[function]"),
            JsValue::Object(ObjectClass::Array) => write!(f, "[array]"),
            JsValue::Object(ObjectClass::Error) => write!(f, "[error]"),
            JsValue::Object(ObjectClass::Buffer(t)) => write!(f, "[{}]", t.name()),
            JsValue::Object(ObjectClass::Plain) => write!(f, "[object]"),
        }
    }
}

/// Formats a number the way scripts print it: integral values without a
/// fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        if n == 0.0 {
            "0".to_string()
        } else {
            format!("{:.0}", n)
        }
    } else {
        n.to_string()
    }
}

/// ECMAScript ToUint32: truncate, then wrap modulo 2^32. `NaN` and the
/// infinities become 0.
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// ECMAScript ToInt32, the signed view of [`to_uint32`].
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Str(String),
    Index(u32),
    Symbol(RawValue),
}

impl PropertyKey {
    /// The string form used for named lookups; symbols have none.
    pub fn as_name(&self) -> Option<String> {
        match self {
            PropertyKey::Str(s) => Some(s.clone()),
            PropertyKey::Index(i) => Some(i.to_string()),
            PropertyKey::Symbol(_) => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::Str(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        PropertyKey::Str(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        PropertyKey::Index(i)
    }
}

impl Display for PropertyKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Str(s) => write!(f, "{}", s),
            PropertyKey::Index(i) => write!(f, "{}", i),
            PropertyKey::Symbol(s) => write!(f, "Symbol({:?})", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_int32_wraps() {
        assert_eq!(to_int32(4_294_967_297.0), 1);
        assert_eq!(to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
        assert_eq!(to_uint32(-1.0), u32::MAX);
        assert_eq!(to_uint32(4_294_967_296.0 * 3.0 + 5.0), 5);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(JsValue::Object(ObjectClass::Function).type_name(), "function");
        assert_eq!(JsValue::Object(ObjectClass::Array).type_name(), "object");
        assert_eq!(JsValue::Symbol("x".to_string()).type_name(), "symbol");
        assert!(JsValue::Null.is_nullish());
        assert!(!JsValue::Boolean(false).is_object_like());
    }
}
