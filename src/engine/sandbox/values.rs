//! Value primitives of the sandbox engine: allocation, conversions and
//! property access.

use super::heap::{CellData, Internal, Key, ObjectData, Slot};
use super::SandboxEngine;
use crate::engine::RawValue;
use crate::runner::ds::error::ErrorType;
use crate::runner::ds::value::{BufferType, JsValue, ObjectClass};

/// Prototype chains longer than this are treated as broken.
const MAX_PROTOTYPE_HOPS: usize = 256;
const MAX_DISPLAY_DEPTH: usize = 8;

pub(super) enum Lookup {
    Found(RawValue),
    Number(f64),
    /// An accessor; reading it calls the getter, if there is one.
    Getter(Option<RawValue>),
    Missing,
}

/// What a write to a property has to do.
pub(super) enum Store {
    Done,
    Setter(RawValue),
}

pub fn read_element(kind: BufferType, data: &[u8], index: usize) -> Option<f64> {
    let size = kind.element_size();
    let start = index.checked_mul(size)?;
    let bytes = data.get(start..start + size)?;
    let mut raw = [0u8; 8];
    raw[..size].copy_from_slice(bytes);
    Some(match kind {
        BufferType::ArrayBuffer | BufferType::Uint8 | BufferType::Uint8Clamped => bytes[0] as f64,
        BufferType::Int8 => bytes[0] as i8 as f64,
        BufferType::Int16 => i16::from_le_bytes([raw[0], raw[1]]) as f64,
        BufferType::Uint16 => u16::from_le_bytes([raw[0], raw[1]]) as f64,
        BufferType::Int32 => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        BufferType::Uint32 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        BufferType::Float32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        BufferType::Float64 => f64::from_le_bytes(raw),
    })
}

pub fn write_element(kind: BufferType, data: &mut [u8], index: usize, value: f64) -> bool {
    let size = kind.element_size();
    let start = match index.checked_mul(size) {
        Some(s) if s + size <= data.len() => s,
        _ => return false,
    };
    let integral = if value.is_finite() { value.trunc() } else { 0.0 };
    let bytes: Vec<u8> = match kind {
        BufferType::ArrayBuffer | BufferType::Uint8 => vec![(integral as i64) as u8],
        BufferType::Uint8Clamped => vec![value.max(0.0).min(255.0).round() as u8],
        BufferType::Int8 => vec![(integral as i64) as i8 as u8],
        BufferType::Int16 => ((integral as i64) as i16).to_le_bytes().to_vec(),
        BufferType::Uint16 => ((integral as i64) as u16).to_le_bytes().to_vec(),
        BufferType::Int32 => ((integral as i64) as i32).to_le_bytes().to_vec(),
        BufferType::Uint32 => ((integral as i64) as u32).to_le_bytes().to_vec(),
        BufferType::Float32 => (value as f32).to_le_bytes().to_vec(),
        BufferType::Float64 => value.to_le_bytes().to_vec(),
    };
    data[start..start + size].copy_from_slice(&bytes);
    true
}

fn array_length_of(o: &ObjectData) -> usize {
    o.properties
        .iter()
        .filter_map(|p| match &p.key {
            Key::Name(n) => n.parse::<usize>().ok(),
            Key::Symbol(_) => None,
        })
        .map(|i| i + 1)
        .max()
        .unwrap_or(0)
}

fn is_length(key: &Key) -> bool {
    matches!(key, Key::Name(n) if n == "length")
}

impl SandboxEngine {
    pub(super) fn alloc(&self, data: CellData) -> RawValue {
        self.heap.borrow_mut().alloc(data)
    }

    pub(super) fn alloc_object(&self, class: ObjectClass, internal: Internal) -> RawValue {
        self.alloc(CellData::Object(ObjectData::new(class, internal)))
    }

    pub(super) fn inspect_value(&self, value: RawValue) -> JsValue {
        let heap = self.heap.borrow();
        match heap.get(value).map(|c| &c.data) {
            Some(CellData::Null) => JsValue::Null,
            Some(CellData::Boolean(b)) => JsValue::Boolean(*b),
            Some(CellData::Number(n)) => JsValue::Number(*n),
            Some(CellData::Str(s)) => JsValue::String(s.clone()),
            Some(CellData::Symbol(s)) => JsValue::Symbol(s.clone()),
            Some(CellData::Object(o)) => JsValue::Object(o.class),
            Some(CellData::Undefined) | Some(CellData::Free) | None => JsValue::Undefined,
        }
    }

    pub(super) fn truthy(&self, value: RawValue) -> bool {
        match self.inspect_value(value) {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Boolean(b) => b,
            JsValue::Number(n) => n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Symbol(_) | JsValue::Object(_) => true,
        }
    }

    pub(super) fn number_of(&self, value: RawValue) -> Result<f64, String> {
        match self.inspect_value(value) {
            JsValue::Undefined => Ok(f64::NAN),
            JsValue::Null => Ok(0.0),
            JsValue::Boolean(b) => Ok(if b { 1.0 } else { 0.0 }),
            JsValue::Number(n) => Ok(n),
            JsValue::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Ok(0.0)
                } else {
                    Ok(trimmed.parse::<f64>().unwrap_or(f64::NAN))
                }
            }
            JsValue::Symbol(_) => Err("cannot convert a symbol to a number".to_string()),
            JsValue::Object(_) => match self.boxed_primitive(value) {
                Some(inner) => self.number_of(inner),
                None => Ok(f64::NAN),
            },
        }
    }

    pub(super) fn display(&self, value: RawValue) -> String {
        self.display_at(value, 0)
    }

    fn display_at(&self, value: RawValue, depth: usize) -> String {
        match self.inspect_value(value) {
            JsValue::String(s) => s,
            JsValue::Symbol(s) => format!("Symbol({})", s),
            JsValue::Object(ObjectClass::Error) => {
                let name = self.named_string(value, "name").unwrap_or_else(|| "Error".to_string());
                match self.named_string(value, "message") {
                    Some(m) if !m.is_empty() => format!("{}: {}", name, m),
                    _ => name,
                }
            }
            JsValue::Object(ObjectClass::Function) => {
                let name = self.named_string(value, "name").unwrap_or_default();
                format!("function {}() {{ [code] }}", name)
            }
            JsValue::Object(ObjectClass::Array) => {
                if depth >= MAX_DISPLAY_DEPTH {
                    return String::new();
                }
                (0..self.array_length(value))
                    .map(|i| match self.get_prop(value, &Key::Name(i.to_string())) {
                        Some(v) if !self.inspect_value(v).is_nullish() => self.display_at(v, depth + 1),
                        _ => String::new(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            JsValue::Object(ObjectClass::Buffer(kind)) => format!("[object {}]", kind.name()),
            JsValue::Object(ObjectClass::Plain) => match self.boxed_primitive(value) {
                Some(inner) => self.display_at(inner, depth),
                None => "[object Object]".to_string(),
            },
            other => other.to_string(),
        }
    }

    fn named_string(&self, object: RawValue, name: &str) -> Option<String> {
        let v = self.get_prop(object, &Key::Name(name.to_string()))?;
        match self.inspect_value(v) {
            JsValue::Undefined => None,
            _ => Some(self.display(v)),
        }
    }

    pub(super) fn same_value(&self, a: RawValue, b: RawValue) -> bool {
        match (self.inspect_value(a), self.inspect_value(b)) {
            (JsValue::Number(x), JsValue::Number(y)) => x == y,
            (JsValue::String(x), JsValue::String(y)) => x == y,
            (JsValue::Boolean(x), JsValue::Boolean(y)) => x == y,
            (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
            _ => a == b,
        }
    }

    pub(super) fn boxed_primitive(&self, value: RawValue) -> Option<RawValue> {
        match self.heap.borrow().object(value).map(|o| &o.internal) {
            Some(Internal::Boxed(inner)) => Some(*inner),
            _ => None,
        }
    }

    pub(super) fn array_length(&self, value: RawValue) -> usize {
        self.heap
            .borrow()
            .object(value)
            .map(array_length_of)
            .unwrap_or(0)
    }

    pub(super) fn lookup(&self, target: RawValue, key: &Key) -> Lookup {
        let heap = self.heap.borrow();
        match heap.get(target).map(|c| &c.data) {
            Some(CellData::Str(s)) if is_length(key) => {
                return Lookup::Number(s.chars().count() as f64)
            }
            Some(CellData::Object(_)) => {}
            _ => return Lookup::Missing,
        }
        if let Some(o) = heap.object(target) {
            match (&o.class, &o.internal) {
                (ObjectClass::Array, _) if is_length(key) => {
                    return Lookup::Number(array_length_of(o) as f64)
                }
                (_, Internal::Boxed(inner)) if is_length(key) => {
                    if let Some(CellData::Str(s)) = heap.get(*inner).map(|c| &c.data) {
                        return Lookup::Number(s.chars().count() as f64);
                    }
                }
                (_, Internal::Buffer(kind, data)) => {
                    if is_length(key) {
                        return Lookup::Number((data.len() / kind.element_size()) as f64);
                    }
                    if let Key::Name(n) = key {
                        if let Ok(i) = n.parse::<usize>() {
                            return match read_element(*kind, data, i) {
                                Some(v) => Lookup::Number(v),
                                None => Lookup::Missing,
                            };
                        }
                    }
                }
                _ => {}
            }
        }
        let mut current = Some(target);
        for _ in 0..MAX_PROTOTYPE_HOPS {
            let o = match current.and_then(|id| heap.object(id)) {
                Some(o) => o,
                None => break,
            };
            if let Some(p) = o.property(key) {
                return match p.slot {
                    Slot::Data(v) => Lookup::Found(v),
                    Slot::Accessor { getter, .. } => Lookup::Getter(getter),
                };
            }
            current = o.prototype;
        }
        Lookup::Missing
    }

    /// Reads a data property through the prototype chain. Accessors read as
    /// absent here; script reads go through `read_prop`, which calls getters.
    pub(super) fn get_prop(&self, target: RawValue, key: &Key) -> Option<RawValue> {
        match self.lookup(target, key) {
            Lookup::Found(v) => Some(v),
            Lookup::Number(n) => Some(self.alloc(CellData::Number(n))),
            Lookup::Getter(_) | Lookup::Missing => None,
        }
    }

    /// The getter a read of `key` would call.
    pub(super) fn getter_of(&self, target: RawValue, key: &Key) -> Option<RawValue> {
        match self.lookup(target, key) {
            Lookup::Getter(getter) => getter,
            _ => None,
        }
    }

    /// Finds what owns a write of `key` along the prototype chain.
    fn write_target(&self, target: RawValue, key: &Key) -> Result<Option<RawValue>, String> {
        let heap = self.heap.borrow();
        let mut current = Some(target);
        for _ in 0..MAX_PROTOTYPE_HOPS {
            let o = match current.and_then(|id| heap.object(id)) {
                Some(o) => o,
                None => break,
            };
            if let Some(p) = o.property(key) {
                return match p.slot {
                    Slot::Accessor { setter: Some(s), .. } => Ok(Some(s)),
                    Slot::Accessor { setter: None, .. } => {
                        Err(format!("cannot set property '{}' which has only a getter", key))
                    }
                    Slot::Data(_) if !p.attributes.writable => {
                        Err(format!("cannot assign to read-only property '{}'", key))
                    }
                    Slot::Data(_) => Ok(None),
                };
            }
            current = o.prototype;
        }
        Ok(None)
    }

    pub(super) fn has_prop(&self, target: RawValue, key: &Key) -> bool {
        !matches!(self.lookup(target, key), Lookup::Missing)
    }

    /// Writes a property, or names the setter the caller has to call.
    pub(super) fn put_prop(&self, target: RawValue, key: Key, value: RawValue) -> Result<Store, String> {
        let kind = self.inspect_value(target);
        if !kind.is_object_like() {
            if kind.is_nullish() {
                if let Key::Name(n) = &key {
                    return Err(format!("cannot set property '{}' of {}", n, kind.type_name()));
                }
                return Err(format!("cannot set a property of {}", kind.type_name()));
            }
            return Ok(Store::Done);
        }
        if let Some(setter) = self.write_target(target, &key)? {
            return Ok(Store::Setter(setter));
        }
        let number = self.number_of(value).unwrap_or(f64::NAN);
        let mut heap = self.heap.borrow_mut();
        let o = match heap.object_mut(target) {
            Some(o) => o,
            None => return Ok(Store::Done),
        };
        if let Internal::Buffer(buffer_kind, data) = &mut o.internal {
            if let Key::Name(n) = &key {
                if let Ok(i) = n.parse::<usize>() {
                    write_element(*buffer_kind, data, i, number);
                    return Ok(Store::Done);
                }
            }
        }
        if o.class == ObjectClass::Array && is_length(&key) {
            return Ok(Store::Done);
        }
        o.set(key, value);
        Ok(Store::Done)
    }

    /// An error object carrying `name`, `message` and a `stack` of the
    /// current frames.
    pub(super) fn new_error(&self, kind: ErrorType, message: &str) -> RawValue {
        let mut stack = if message.is_empty() {
            kind.name().to_string()
        } else {
            format!("{}: {}", kind.name(), message)
        };
        let frames: Vec<(String, u32, u32, u32)> = self
            .frames
            .borrow()
            .iter()
            .rev()
            .map(|f| (f.function_name.clone(), f.script_id, f.pos.line, f.pos.column))
            .collect();
        for (name, script_id, line, column) in frames {
            stack.push_str(&format!(
                "\n    at {} ({}:{}:{})",
                name,
                self.script_filename(script_id),
                line + 1,
                column + 1
            ));
        }
        let error = self.alloc_object(ObjectClass::Error, Internal::None);
        let name = self.alloc(CellData::Str(kind.name().to_string()));
        let message = self.alloc(CellData::Str(message.to_string()));
        let stack = self.alloc(CellData::Str(stack));
        if let Some(o) = self.heap.borrow_mut().object_mut(error) {
            o.set(Key::Name("name".to_string()), name);
            o.set(Key::Name("message".to_string()), message);
            o.set(Key::Name("stack".to_string()), stack);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_elements_are_little_endian() {
        let mut data = vec![0u8; 8];
        assert!(write_element(BufferType::Int16, &mut data, 1, -2.0));
        assert_eq!(&data[2..4], &[0xfe, 0xff]);
        assert_eq!(read_element(BufferType::Int16, &data, 1), Some(-2.0));
        assert_eq!(read_element(BufferType::Int16, &data, 4), None);
        assert!(!write_element(BufferType::Float64, &mut data, 1, 1.0));
    }

    #[test]
    fn test_clamped_buffer_saturates() {
        let mut data = vec![0u8; 2];
        write_element(BufferType::Uint8Clamped, &mut data, 0, 300.0);
        write_element(BufferType::Uint8Clamped, &mut data, 1, -5.0);
        assert_eq!(data, vec![255, 0]);
    }
}
