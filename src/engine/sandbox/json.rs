use serde_json::{Map, Value};

use super::heap::{CellData, Internal, Key, FALSE, NULL, TRUE};
use super::SandboxEngine;
use crate::engine::RawValue;
use crate::runner::ds::value::{JsValue, ObjectClass};

const MAX_JSON_DEPTH: usize = 64;

impl SandboxEngine {
    pub(super) fn from_json(&self, value: &Value) -> RawValue {
        match value {
            Value::Null => NULL,
            Value::Bool(b) => {
                if *b {
                    TRUE
                } else {
                    FALSE
                }
            }
            Value::Number(n) => self.alloc(CellData::Number(n.as_f64().unwrap_or(f64::NAN))),
            Value::String(s) => self.alloc(CellData::Str(s.clone())),
            Value::Array(items) => {
                let array = self.alloc_object(ObjectClass::Array, Internal::None);
                for (i, item) in items.iter().enumerate() {
                    let v = self.from_json(item);
                    if let Some(o) = self.heap.borrow_mut().object_mut(array) {
                        o.set(Key::Name(i.to_string()), v);
                    }
                }
                array
            }
            Value::Object(map) => {
                let object = self.alloc_object(ObjectClass::Plain, Internal::None);
                for (k, item) in map {
                    let v = self.from_json(item);
                    if let Some(o) = self.heap.borrow_mut().object_mut(object) {
                        o.set(Key::Name(k.clone()), v);
                    }
                }
                object
            }
        }
    }

    /// `Ok(None)` for values JSON skips: `undefined`, functions and symbols.
    pub(super) fn to_json(&self, value: RawValue, depth: usize) -> Result<Option<Value>, String> {
        if depth > MAX_JSON_DEPTH {
            return Err("cannot serialize a cyclic or too deeply nested value".to_string());
        }
        Ok(match self.inspect_value(value) {
            JsValue::Undefined | JsValue::Symbol(_) => None,
            JsValue::Object(ObjectClass::Function) => None,
            JsValue::Null => Some(Value::Null),
            JsValue::Boolean(b) => Some(Value::Bool(b)),
            JsValue::Number(n) => Some(number_to_json(n)),
            JsValue::String(s) => Some(Value::String(s)),
            JsValue::Object(ObjectClass::Array) => {
                let mut items = vec![];
                for i in 0..self.array_length(value) {
                    let item = match self.get_prop(value, &Key::Name(i.to_string())) {
                        Some(v) => self.to_json(v, depth + 1)?,
                        None => None,
                    };
                    items.push(item.unwrap_or(Value::Null));
                }
                Some(Value::Array(items))
            }
            JsValue::Object(_) if self.boxed_primitive(value).is_some() => {
                match self.boxed_primitive(value) {
                    Some(inner) => self.to_json(inner, depth + 1)?,
                    None => None,
                }
            }
            JsValue::Object(_) => {
                let entries: Vec<(String, RawValue)> = match self.heap.borrow().object(value) {
                    Some(o) => o.entries().map(|(k, v)| (k.to_string(), v)).collect(),
                    None => vec![],
                };
                let mut map = Map::new();
                for (k, v) in entries {
                    if let Some(item) = self.to_json(v, depth + 1)? {
                        map.insert(k, item);
                    }
                }
                Some(Value::Object(map))
            }
        })
    }
}

fn number_to_json(n: f64) -> Value {
    if !n.is_finite() {
        Value::Null
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
