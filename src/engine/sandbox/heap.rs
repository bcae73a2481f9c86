//! Reference-counted value heap of the sandbox engine.
//!
//! Every value lives in a cell addressed by its [`RawValue`] id. The host
//! bumps and drops per-cell reference counts; nothing is freed until
//! [`Heap::collect`] runs a mark-and-sweep pass from the roots it is given
//! plus every cell whose count is above zero.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use super::ast::{FunctionDecl, Program};
use super::interp::{Scope, ScopeRef};
use crate::engine::{Finalizer, FunctionId, RawValue};
use crate::runner::ds::error::ErrorType;
use crate::runner::ds::value::{BufferType, ObjectClass};

pub const UNDEFINED: RawValue = RawValue::from_id(0);
pub const NULL: RawValue = RawValue::from_id(1);
pub const TRUE: RawValue = RawValue::from_id(2);
pub const FALSE: RawValue = RawValue::from_id(3);
const FIXED_CELLS: u32 = 4;

pub struct Cell {
    pub refs: u32,
    marked: bool,
    pub data: CellData,
}

pub enum CellData {
    Free,
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    Str(String),
    Symbol(String),
    Object(ObjectData),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Name(String),
    Symbol(RawValue),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(n) => write!(f, "{}", n),
            Key::Symbol(s) => write!(f, "Symbol({:?})", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Attributes {
    /// What plain assignment creates.
    pub const OPEN: Attributes = Attributes {
        writable: true,
        enumerable: true,
        configurable: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Data(RawValue),
    Accessor {
        getter: Option<RawValue>,
        setter: Option<RawValue>,
    },
}

pub struct Property {
    pub key: Key,
    pub slot: Slot,
    pub attributes: Attributes,
}

pub struct ObjectData {
    pub class: ObjectClass,
    pub properties: Vec<Property>,
    pub prototype: Option<RawValue>,
    pub internal: Internal,
    pub host_data: Option<Rc<dyn Any>>,
    pub finalizer: Option<Finalizer>,
}

impl ObjectData {
    pub fn new(class: ObjectClass, internal: Internal) -> Self {
        ObjectData {
            class,
            properties: vec![],
            prototype: None,
            internal,
            host_data: None,
            finalizer: None,
        }
    }

    pub fn property(&self, key: &Key) -> Option<&Property> {
        self.properties.iter().find(|p| p.key == *key)
    }

    /// The value of an own data property. Accessors read as absent.
    pub fn get(&self, key: &Key) -> Option<RawValue> {
        match self.property(key)?.slot {
            Slot::Data(v) => Some(v),
            Slot::Accessor { .. } => None,
        }
    }

    /// Stores a data property, keeping the attributes of an existing one.
    pub fn set(&mut self, key: Key, value: RawValue) {
        match self.properties.iter_mut().find(|p| p.key == key) {
            Some(p) => p.slot = Slot::Data(value),
            None => self.properties.push(Property {
                key,
                slot: Slot::Data(value),
                attributes: Attributes::OPEN,
            }),
        }
    }

    pub fn define(&mut self, key: Key, slot: Slot, attributes: Attributes) {
        match self.properties.iter_mut().find(|p| p.key == key) {
            Some(p) => {
                p.slot = slot;
                p.attributes = attributes;
            }
            None => self.properties.push(Property {
                key,
                slot,
                attributes,
            }),
        }
    }

    pub fn remove(&mut self, key: &Key) -> bool {
        let before = self.properties.len();
        self.properties.retain(|p| p.key != *key);
        before != self.properties.len()
    }

    /// Enumerable string keys in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|p| p.attributes.enumerable)
            .filter_map(|p| match &p.key {
                Key::Name(n) => Some(n.clone()),
                Key::Symbol(_) => None,
            })
            .collect()
    }

    /// Enumerable string-keyed data properties.
    pub fn entries(&self) -> impl Iterator<Item = (&str, RawValue)> + '_ {
        self.properties
            .iter()
            .filter(|p| p.attributes.enumerable)
            .filter_map(|p| match (&p.key, p.slot) {
                (Key::Name(n), Slot::Data(v)) => Some((n.as_str(), v)),
                _ => None,
            })
    }

    fn references(&self) -> Vec<RawValue> {
        let mut out = vec![];
        for p in &self.properties {
            if let Key::Symbol(s) = p.key {
                out.push(s);
            }
            match p.slot {
                Slot::Data(v) => out.push(v),
                Slot::Accessor { getter, setter } => {
                    out.extend(getter);
                    out.extend(setter);
                }
            }
        }
        out.extend(self.prototype);
        if let Internal::Boxed(v) = self.internal {
            out.push(v);
        }
        out
    }

    fn take_finalization(&mut self) -> Option<Finalization> {
        self.finalizer.take().map(|finalizer| Finalization {
            finalizer,
            data: self.host_data.take(),
        })
    }
}

/// A finalizer detached from its dead object, ready to run.
pub struct Finalization {
    finalizer: Finalizer,
    data: Option<Rc<dyn Any>>,
}

impl Finalization {
    pub fn run(self) {
        (self.finalizer)(self.data)
    }
}

/// Engine-private state attached to an object.
pub enum Internal {
    None,
    HostFunction(FunctionId),
    ScriptFunction {
        decl: Rc<FunctionDecl>,
        scope: ScopeRef,
        script_id: u32,
    },
    CompiledScript {
        program: Rc<Program>,
        script_id: u32,
    },
    ErrorConstructor(ErrorType),
    Buffer(BufferType, Vec<u8>),
    /// A primitive converted to an object.
    Boxed(RawValue),
}

pub struct Heap {
    cells: Vec<Cell>,
    free: Vec<u32>,
    finalizations: Vec<Finalization>,
}

impl Heap {
    pub fn new() -> Self {
        let fixed = vec![
            CellData::Undefined,
            CellData::Null,
            CellData::Boolean(true),
            CellData::Boolean(false),
        ];
        Heap {
            cells: fixed
                .into_iter()
                .map(|data| Cell {
                    refs: 0,
                    marked: false,
                    data,
                })
                .collect(),
            free: vec![],
            finalizations: vec![],
        }
    }

    pub fn alloc(&mut self, data: CellData) -> RawValue {
        let cell = Cell {
            refs: 0,
            marked: false,
            data,
        };
        match self.free.pop() {
            Some(id) => {
                self.cells[id as usize] = cell;
                RawValue::from_id(id)
            }
            None => {
                self.cells.push(cell);
                RawValue::from_id(self.cells.len() as u32 - 1)
            }
        }
    }

    pub fn get(&self, value: RawValue) -> Option<&Cell> {
        match self.cells.get(value.id() as usize) {
            Some(Cell {
                data: CellData::Free,
                ..
            }) => None,
            other => other,
        }
    }

    pub fn object(&self, value: RawValue) -> Option<&ObjectData> {
        match self.get(value).map(|c| &c.data) {
            Some(CellData::Object(o)) => Some(o),
            _ => None,
        }
    }

    pub fn object_mut(&mut self, value: RawValue) -> Option<&mut ObjectData> {
        match self.cells.get_mut(value.id() as usize).map(|c| &mut c.data) {
            Some(CellData::Object(o)) => Some(o),
            _ => None,
        }
    }

    pub fn add_ref(&mut self, value: RawValue) -> u32 {
        match self.cells.get_mut(value.id() as usize) {
            Some(cell) => {
                cell.refs += 1;
                cell.refs
            }
            None => 0,
        }
    }

    pub fn release(&mut self, value: RawValue) -> u32 {
        match self.cells.get_mut(value.id() as usize) {
            Some(cell) => {
                cell.refs = cell.refs.saturating_sub(1);
                cell.refs
            }
            None => 0,
        }
    }

    pub fn ref_count(&self, value: RawValue) -> u32 {
        self.get(value).map(|c| c.refs).unwrap_or(0)
    }

    pub fn live_cells(&self) -> usize {
        self.cells.len() - self.free.len()
    }

    /// Frees every cell unreachable from `roots`, `scopes` and the cells with
    /// a non-zero reference count.
    pub fn collect(&mut self, roots: Vec<RawValue>, scopes: Vec<ScopeRef>) -> usize {
        let mut work: Vec<RawValue> = roots;
        let mut scope_work: Vec<ScopeRef> = scopes;
        let mut seen_scopes: HashSet<*const std::cell::RefCell<Scope>> = HashSet::new();
        for (id, cell) in self.cells.iter().enumerate() {
            if cell.refs > 0 {
                work.push(RawValue::from_id(id as u32));
            }
        }
        loop {
            if let Some(value) = work.pop() {
                let cell = match self.cells.get_mut(value.id() as usize) {
                    Some(c) => c,
                    None => continue,
                };
                if cell.marked {
                    continue;
                }
                cell.marked = true;
                if let CellData::Object(o) = &cell.data {
                    work.extend(o.references());
                    if let Internal::ScriptFunction { scope, .. } = &o.internal {
                        scope_work.push(Rc::clone(scope));
                    }
                }
            } else if let Some(scope) = scope_work.pop() {
                if !seen_scopes.insert(Rc::as_ptr(&scope)) {
                    continue;
                }
                let scope = scope.borrow();
                work.extend(scope.vars.values().copied());
                if let Some(parent) = &scope.parent {
                    scope_work.push(Rc::clone(parent));
                }
            } else {
                break;
            }
        }

        let mut freed = 0;
        for (id, cell) in self.cells.iter_mut().enumerate() {
            let id = id as u32;
            if id < FIXED_CELLS || matches!(cell.data, CellData::Free) {
                cell.marked = false;
                continue;
            }
            if cell.marked {
                cell.marked = false;
            } else {
                if let CellData::Object(o) = &mut cell.data {
                    self.finalizations.extend(o.take_finalization());
                }
                cell.data = CellData::Free;
                cell.refs = 0;
                self.free.push(id);
                freed += 1;
            }
        }
        freed
    }

    /// Finalizers of the objects the last collections freed. The caller runs
    /// them once it no longer holds the heap.
    pub fn take_finalizations(&mut self) -> Vec<Finalization> {
        std::mem::take(&mut self.finalizations)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.finalizations);
        for cell in self.cells.iter_mut() {
            if let CellData::Object(o) = &mut cell.data {
                pending.extend(o.take_finalization());
            }
        }
        for f in pending {
            f.run();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refcount_roots_survive() {
        let mut heap = Heap::new();
        let kept = heap.alloc(CellData::Str("kept".to_string()));
        let dropped = heap.alloc(CellData::Str("dropped".to_string()));
        heap.add_ref(kept);
        assert_eq!(heap.collect(vec![], vec![]), 1);
        assert!(heap.get(kept).is_some());
        assert!(heap.get(dropped).is_none());
        assert_eq!(heap.ref_count(dropped), 0);
    }

    #[test]
    fn test_reachable_through_properties() {
        let mut heap = Heap::new();
        let root = heap.alloc(CellData::Object(ObjectData::new(
            ObjectClass::Plain,
            Internal::None,
        )));
        let child = heap.alloc(CellData::Number(4.0));
        if let Some(o) = heap.object_mut(root) {
            o.set(Key::Name("child".to_string()), child);
        }
        assert_eq!(heap.collect(vec![root], vec![]), 0);
        assert!(heap.get(child).is_some());
    }

    #[test]
    fn test_free_cells_are_reused() {
        let mut heap = Heap::new();
        let a = heap.alloc(CellData::Number(1.0));
        heap.collect(vec![], vec![]);
        let b = heap.alloc(CellData::Number(2.0));
        assert_eq!(a, b);
        assert_eq!(heap.live_cells(), 5);
    }

    #[test]
    fn test_finalizer_waits_for_the_sweep() {
        use std::cell::Cell as Flag;

        let mut heap = Heap::new();
        let object = heap.alloc(CellData::Object(ObjectData::new(
            ObjectClass::Plain,
            Internal::None,
        )));
        let seen = Rc::new(Flag::new(0));
        let witness = Rc::clone(&seen);
        if let Some(o) = heap.object_mut(object) {
            o.host_data = Some(Rc::new(7u8));
            o.finalizer = Some(Box::new(move |data| {
                let value = data.and_then(|d| d.downcast::<u8>().ok());
                witness.set(value.map(|v| *v).unwrap_or(0));
            }));
        }
        heap.add_ref(object);
        heap.collect(vec![], vec![]);
        assert!(heap.take_finalizations().is_empty());
        heap.release(object);
        heap.collect(vec![], vec![]);
        for f in heap.take_finalizations() {
            f.run();
        }
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn test_dropping_the_heap_runs_finalizers() {
        let seen = Rc::new(std::cell::Cell::new(false));
        let witness = Rc::clone(&seen);
        let mut heap = Heap::new();
        let object = heap.alloc(CellData::Object(ObjectData::new(
            ObjectClass::Plain,
            Internal::None,
        )));
        if let Some(o) = heap.object_mut(object) {
            o.finalizer = Some(Box::new(move |_| witness.set(true)));
        }
        drop(heap);
        assert!(seen.get());
    }

    #[test]
    fn test_hidden_properties_are_not_listed() {
        let mut o = ObjectData::new(ObjectClass::Plain, Internal::None);
        o.set(Key::Name("shown".to_string()), UNDEFINED);
        o.define(
            Key::Name("hidden".to_string()),
            Slot::Data(NULL),
            Attributes {
                writable: false,
                enumerable: false,
                configurable: false,
            },
        );
        assert_eq!(o.names(), vec!["shown"]);
        assert_eq!(o.get(&Key::Name("hidden".to_string())), Some(NULL));
        o.set(Key::Name("hidden".to_string()), TRUE);
        assert!(!o.property(&Key::Name("hidden".to_string())).unwrap().attributes.enumerable);
    }

    #[test]
    fn test_fixed_cells_are_never_freed() {
        let mut heap = Heap::new();
        heap.collect(vec![], vec![]);
        assert!(heap.get(UNDEFINED).is_some());
        assert!(heap.get(FALSE).is_some());
    }
}
