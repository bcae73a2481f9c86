//! Native classes and object plumbing: constructors with a prototype, host
//! data and finalizers, descriptor-based property definition, and iteration.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use crate::engine::{Finalizer, PropertyDescriptor, RawValue};
use crate::runner::ds::error::{ErrorKind, ErrorType, JsResult};
use crate::runner::ds::handle::Owned;
use crate::runner::ds::value::{JsValue, ObjectClass, PropertyKey};
use crate::runner::plugin::types::NativeFunction;
use crate::runner::session::Session;

/// Where an item iterator keeps the values it walks.
const ITEMS: &str = "items";

/// Position of an iterator made by [`Session::push_new_iterator`].
struct ItemCursor {
    next: Cell<u32>,
    len: u32,
}

impl Session {
    /// Pushes a constructor-only native function whose `prototype` is the
    /// object at `prototype_index`. The prototype gets a non-enumerable
    /// `constructor` pointing back, and instances made with `new` inherit
    /// from it.
    pub fn push_constructor(
        &mut self,
        function: NativeFunction,
        prototype_index: i32,
    ) -> JsResult<usize> {
        self.require_object(prototype_index)?;
        let prototype = self.slot(prototype_index)?;
        let name = function.name.clone();
        let index = self.register_function(function.constructor_only());
        let constructor = self.slot(-1)?;
        self.write_property(constructor, &PropertyKey::from("prototype"), prototype)?;
        self.engine()
            .define_property(
                prototype,
                &PropertyKey::from("constructor"),
                PropertyDescriptor {
                    value: Some(constructor),
                    writable: true,
                    configurable: true,
                    ..PropertyDescriptor::default()
                },
            )
            .map_err(|e| self.engine_failure(e))?;
        debug!(name = %name, "registered native class");
        Ok(index)
    }

    /// Pushes a plain object carrying `data`. The finalizer, if any, runs
    /// once the object has been collected and receives the data back.
    pub fn push_host_object<T: Any>(
        &mut self,
        data: T,
        finalizer: Option<Finalizer>,
    ) -> JsResult<usize> {
        let object = self.engine().create_object();
        let index = self.push_owned(object);
        self.set_host_data(-1, data)?;
        if let Some(finalizer) = finalizer {
            self.engine()
                .set_finalizer(object, Some(finalizer))
                .map_err(|e| self.engine_failure(e))?;
        }
        Ok(index)
    }

    /// Attaches `data` to the object at `index`, replacing what was there.
    pub fn set_host_data<T: Any>(&mut self, index: i32, data: T) -> JsResult<()> {
        self.require_object(index)?;
        let object = self.slot(index)?;
        self.engine()
            .set_host_data(object, Some(Rc::new(data)))
            .map_err(|e| self.engine_failure(e))
    }

    /// The data attached to the object at `index`, if it is a `T`.
    pub fn get_host_data<T: Any>(&self, index: i32) -> Option<Rc<T>> {
        let object = self.slot(index).ok()?;
        self.engine().host_data(object)?.downcast::<T>().ok()
    }

    pub fn require_host_data<T: Any>(&self, index: i32) -> JsResult<Rc<T>> {
        self.require_object(index)?;
        self.get_host_data(index).ok_or_else(|| {
            self.fail(
                ErrorKind::TypeMismatch,
                ErrorType::TypeError,
                &format!(
                    "object at stack index {} does not carry {}",
                    index,
                    std::any::type_name::<T>()
                ),
            )
        })
    }

    /// Installs a finalizer on the object at `index`, replacing any earlier
    /// one. It runs after the object is collected, or when the engine resets.
    pub fn set_finalizer(
        &mut self,
        index: i32,
        finalizer: impl FnOnce(Option<Rc<dyn Any>>) + 'static,
    ) -> JsResult<()> {
        self.require_object(index)?;
        let object = self.slot(index)?;
        self.engine()
            .set_finalizer(object, Some(Box::new(finalizer)))
            .map_err(|e| self.engine_failure(e))
    }

    // ── Property definition ──

    /// `[... key descriptor] -> [...]`
    ///
    /// The descriptor is an object with the usual `value`, `get`, `set`,
    /// `writable`, `enumerable` and `configurable` fields. Missing flags are
    /// false.
    pub fn def_prop(&mut self, object_index: i32) -> JsResult<()> {
        let object = self.slot(object_index)?;
        let key = self.key_at(-2)?;
        let descriptor = self.read_descriptor(-1)?;
        self.engine()
            .define_property(object, &key, descriptor)
            .map_err(|e| self.engine_failure(e))?;
        self.pop(2)
    }

    /// `[... descriptor] -> [...]`
    pub fn def_prop_string(&mut self, object_index: i32, name: &str) -> JsResult<()> {
        let object_index = self.normalize(object_index)? as i32;
        self.push_string(name);
        self.insert(-2)?;
        self.def_prop(object_index)
    }

    /// `[... descriptor] -> [...]`
    pub fn def_prop_index(&mut self, object_index: i32, index: u32) -> JsResult<()> {
        let object_index = self.normalize(object_index)? as i32;
        self.push_uint(index);
        self.insert(-2)?;
        self.def_prop(object_index)
    }

    fn read_descriptor(&mut self, index: i32) -> JsResult<PropertyDescriptor> {
        self.require_object(index)?;
        let descriptor = self.slot(index)?;
        let has_value = self
            .engine()
            .has_property(descriptor, &PropertyKey::from("value"))
            .map_err(|e| self.engine_failure(e))?;
        let value = if has_value {
            Some(self.read_property(descriptor, &PropertyKey::from("value"))?)
        } else {
            None
        };
        Ok(PropertyDescriptor {
            value,
            getter: self.read_accessor(descriptor, "get")?,
            setter: self.read_accessor(descriptor, "set")?,
            writable: self.read_flag(descriptor, "writable")?,
            enumerable: self.read_flag(descriptor, "enumerable")?,
            configurable: self.read_flag(descriptor, "configurable")?,
        })
    }

    fn read_accessor(&mut self, descriptor: RawValue, name: &str) -> JsResult<Option<RawValue>> {
        let raw = self.read_property(descriptor, &PropertyKey::from(name))?;
        Ok(match self.engine().inspect(raw) {
            JsValue::Undefined => None,
            _ => Some(raw),
        })
    }

    fn read_flag(&mut self, descriptor: RawValue, name: &str) -> JsResult<bool> {
        let raw = self.read_property(descriptor, &PropertyKey::from(name))?;
        Ok(self.engine().to_boolean(raw))
    }

    // ── Iteration ──

    /// Pushes an iterator over the value at `index`: the elements of an
    /// array, or the own enumerable keys of any other object. The items are
    /// snapshotted, so later changes to the source are not seen.
    pub fn push_new_iterator(&mut self, index: i32) -> JsResult<usize> {
        let source = self.slot(index)?;
        let items = Owned::new(self.engine(), self.engine().create_array());
        let kind = self.engine().inspect(source);
        let len = match kind {
            JsValue::Object(ObjectClass::Array) => {
                let len = self.engine().length_of(source).unwrap_or(0) as u32;
                for i in 0..len {
                    let value = self.read_property(source, &PropertyKey::Index(i))?;
                    self.write_property(items.raw(), &PropertyKey::Index(i), value)?;
                }
                len
            }
            JsValue::Object(_) => {
                let keys = self.own_keys(index)?;
                for (i, key) in keys.iter().enumerate() {
                    let value = self.engine().create_string(key);
                    self.write_property(items.raw(), &PropertyKey::Index(i as u32), value)?;
                }
                keys.len() as u32
            }
            other => {
                return Err(self.fail(
                    ErrorKind::TypeMismatch,
                    ErrorType::TypeError,
                    &format!("cannot iterate over {}", other.type_name()),
                ))
            }
        };
        let iterator = self.engine().create_object();
        let index = self.push_owned(iterator);
        self.engine()
            .define_property(
                iterator,
                &PropertyKey::from(ITEMS),
                PropertyDescriptor {
                    value: Some(items.raw()),
                    ..PropertyDescriptor::default()
                },
            )
            .map_err(|e| self.engine_failure(e))?;
        self.set_host_data(
            -1,
            ItemCursor {
                next: Cell::new(0),
                len,
            },
        )?;
        Ok(index)
    }

    /// Advances the iterator at `iter_index`. Pushes the next value and
    /// returns true, or pushes nothing and returns false once it is done.
    ///
    /// Objects not made by [`push_new_iterator`](Session::push_new_iterator)
    /// are driven through their own `next` method.
    pub fn next(&mut self, iter_index: i32) -> JsResult<bool> {
        let iter_index = self.normalize(iter_index)? as i32;
        if let Some(cursor) = self.get_host_data::<ItemCursor>(iter_index) {
            let position = cursor.next.get();
            if position >= cursor.len {
                return Ok(false);
            }
            cursor.next.set(position + 1);
            let iterator = self.slot(iter_index)?;
            let items = self.read_property(iterator, &PropertyKey::from(ITEMS))?;
            let value = self.read_property(items, &PropertyKey::Index(position))?;
            self.push_owned(value);
            return Ok(true);
        }

        self.get_prop_string(iter_index, "next")?;
        self.dup(iter_index)?;
        self.call_method(0)?;
        self.get_prop_string(-1, "done")?;
        let finished = self.to_boolean(-1)?;
        self.pop(1)?;
        if finished {
            self.pop(1)?;
            return Ok(false);
        }
        self.get_prop_string(-1, "value")?;
        self.remove(-2)?;
        Ok(true)
    }
}
