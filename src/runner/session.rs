//! The embedding session: one engine instance plus all host-side bridge
//! state, driven through a stack of value handles.
//!
//! Every value native code works with lives in a slot of the session's
//! [`ValueStack`]. Indices are relative to the current frame (inside a native
//! callback slot `0` is the first argument) and negative indices count down
//! from the top, so `-1` is the most recent push.
//!
//! ```
//! use std::rc::Rc;
//! use jshost::engine::sandbox::SandboxEngine;
//! use jshost::runner::session::Session;
//!
//! let mut session = Session::new(Rc::new(SandboxEngine::new()));
//! session.push_number(10.0);
//! session.push_string("ten");
//! assert_eq!(session.get_top(), 2);
//! assert_eq!(session.get_number(0), 10.0);
//! assert_eq!(session.get_string(-1).as_deref(), Some("ten"));
//! ```

use std::cell::Cell;
use std::rc::Rc;

use tracing::info;
use uuid::Uuid;

use crate::engine::{Engine, EngineError, RawValue, SourceContext};
use crate::runner::debug::DebugBridge;
use crate::runner::ds::error::{ErrorKind, ErrorType, Exception, JsResult, StackError};
use crate::runner::ds::handle::{Handle, Owned, Persistent};
use crate::runner::ds::stack::ValueStack;
use crate::runner::ds::value::{to_int32, to_uint32, BufferType, JsValue, ObjectClass, PropertyKey};
use crate::runner::module::resolver::FsResolver;
use crate::runner::module::ModuleLoader;
use crate::runner::plugin::config::HostConfig;
use crate::runner::plugin::registry::FunctionRegistry;
use crate::runner::protect::CatchStack;

pub struct Session {
    id: Uuid,
    engine: Rc<dyn Engine>,
    config: HostConfig,
    pub(crate) stack: ValueStack,
    pub(crate) catch_stack: CatchStack,
    pub(crate) functions: FunctionRegistry,
    pub(crate) modules: ModuleLoader,
    pub(crate) debugger: DebugBridge,
    /// Receiver and callee of the native call in progress.
    pub(crate) this: Handle,
    pub(crate) callee: Handle,
    stash: Option<Owned>,
    /// The value the last failing native threw, with its kind, so the kind
    /// survives the trip through script back to the host.
    pub(crate) native_failure: Cell<Option<(RawValue, ErrorKind)>>,
    next_source_context: SourceContext,
}

impl Session {
    pub fn new(engine: Rc<dyn Engine>) -> Self {
        Session::with_config(engine, HostConfig::default())
    }

    pub fn with_config(engine: Rc<dyn Engine>, config: HostConfig) -> Self {
        let id = Uuid::new_v4();
        let undefined = engine.undefined();
        let stash = Owned::new(&engine, engine.create_object());
        let resolver = FsResolver::new(".", &config.modules);
        info!("session {} created on the {} engine", id, engine.name());
        Session {
            id,
            stack: ValueStack::new(undefined, config.stack.reserve),
            catch_stack: CatchStack::with_capacity(config.stack.catch_reserve),
            functions: FunctionRegistry::new(),
            modules: ModuleLoader::new(Box::new(resolver)),
            debugger: DebugBridge::default(),
            this: Handle::borrowed(undefined),
            callee: Handle::borrowed(undefined),
            stash: Some(stash),
            native_failure: Cell::new(None),
            next_source_context: 0,
            engine,
            config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn engine(&self) -> &Rc<dyn Engine> {
        &self.engine
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Throws the engine context away and starts over with a fresh one.
    ///
    /// The stack, the module cache, the breakpoint table and every catch
    /// frame are cleared first. [`Persistent`] references taken from the old
    /// context must be released before calling this.
    pub fn reinit(&mut self) {
        self.stack.unwind_to(0, 0);
        self.catch_stack.clear();
        self.modules.clear();
        self.debugger.reset();
        let undefined = self.engine.undefined();
        self.this = Handle::borrowed(undefined);
        self.callee = Handle::borrowed(undefined);
        self.stash = None;
        self.native_failure.set(None);

        self.engine.reset();

        let undefined = self.engine.undefined();
        self.stack.set_undefined(undefined);
        self.this = Handle::borrowed(undefined);
        self.callee = Handle::borrowed(undefined);
        self.stash = Some(Owned::new(&self.engine, self.engine.create_object()));
        info!("session {} reinitialized", self.id);
    }

    /// Stops the engine from running script until re-enabled. Calls into
    /// script fail while disabled; values and properties stay usable.
    pub fn set_disabled(&mut self, disabled: bool) {
        let state = if disabled { "disabled" } else { "enabled" };
        info!("session {} script execution {}", self.id, state);
        self.engine.set_disabled(disabled);
    }

    pub fn is_disabled(&self) -> bool {
        self.engine.is_disabled()
    }

    /// Runs the engine's garbage collector; returns how many values it freed.
    /// Finalizers of freed host objects run before this returns.
    pub fn gc(&mut self) -> usize {
        self.native_failure.set(None);
        self.engine.collect_garbage()
    }

    pub(crate) fn next_source_context(&mut self) -> SourceContext {
        self.next_source_context += 1;
        self.next_source_context
    }

    // ── Errors ──

    /// Wraps a thrown engine value, snapshotting its message.
    pub(crate) fn wrap(&self, raw: RawValue, kind: ErrorKind) -> Exception {
        let message = self.engine.to_display_string(raw).unwrap_or_default();
        Exception::new(Owned::new(&self.engine, raw), kind, message)
    }

    /// Creates an error object and wraps it.
    pub(crate) fn fail(&self, kind: ErrorKind, error_type: ErrorType, message: &str) -> Exception {
        let raw = self.engine.create_error(error_type, message);
        self.wrap(raw, kind)
    }

    /// Collects the exception an engine primitive left pending.
    pub(crate) fn engine_failure(&self, err: EngineError) -> Exception {
        let kind = match err {
            EngineError::Compile => ErrorKind::Compile,
            EngineError::Exception => ErrorKind::Script,
            _ => ErrorKind::Host,
        };
        match self.engine.take_exception() {
            Some(raw) if err.has_pending() => {
                let kind = match self.native_failure.take() {
                    Some((thrown, native_kind)) if thrown == raw => native_kind,
                    _ => kind,
                };
                self.wrap(raw, kind)
            }
            _ => self.fail(kind, ErrorType::Error, &err.to_string()),
        }
    }

    pub(crate) fn stack_failure(&self, err: StackError) -> Exception {
        self.fail(ErrorKind::InvalidStackIndex, ErrorType::RangeError, &err.to_string())
    }

    pub(crate) fn slot(&self, index: i32) -> JsResult<RawValue> {
        self.stack.get(index).map_err(|e| self.stack_failure(e))
    }

    pub(crate) fn set_slot(&mut self, index: i32, raw: RawValue) -> JsResult<()> {
        let handle = Handle::owned(&self.engine, raw);
        self.stack.set(index, handle).map_err(|e| self.stack_failure(e))
    }

    // ── Push ──

    pub(crate) fn push_owned(&mut self, raw: RawValue) -> usize {
        let handle = Handle::owned(&self.engine, raw);
        self.stack.push(handle)
    }

    pub(crate) fn push_borrowed(&mut self, raw: RawValue) -> usize {
        self.stack.push(Handle::borrowed(raw))
    }

    pub fn push_undefined(&mut self) -> usize {
        let raw = self.engine.undefined();
        self.push_borrowed(raw)
    }

    pub fn push_null(&mut self) -> usize {
        let raw = self.engine.null();
        self.push_borrowed(raw)
    }

    pub fn push_boolean(&mut self, value: bool) -> usize {
        let raw = self.engine.create_boolean(value);
        self.push_owned(raw)
    }

    pub fn push_int(&mut self, value: i32) -> usize {
        self.push_number(value as f64)
    }

    pub fn push_uint(&mut self, value: u32) -> usize {
        self.push_number(value as f64)
    }

    pub fn push_number(&mut self, value: f64) -> usize {
        let raw = self.engine.create_number(value);
        self.push_owned(raw)
    }

    pub fn push_string(&mut self, value: &str) -> usize {
        let raw = self.engine.create_string(value);
        self.push_owned(raw)
    }

    pub fn push_object(&mut self) -> usize {
        let raw = self.engine.create_object();
        self.push_owned(raw)
    }

    /// Pushes an object without a prototype.
    pub fn push_bare_object(&mut self) -> usize {
        let raw = self.engine.create_bare_object();
        self.push_owned(raw)
    }

    pub fn push_array(&mut self) -> usize {
        let raw = self.engine.create_array();
        self.push_owned(raw)
    }

    pub fn push_error(&mut self, error_type: ErrorType, message: &str) -> usize {
        let raw = self.engine.create_error(error_type, message);
        self.push_owned(raw)
    }

    pub fn push_symbol(&mut self, description: &str) -> usize {
        let raw = self.engine.create_symbol(description);
        self.push_owned(raw)
    }

    /// Pushes a zero-filled buffer of `length` elements.
    pub fn push_buffer(&mut self, kind: BufferType, length: usize) -> usize {
        let raw = self.engine.create_buffer(kind, length);
        self.push_owned(raw)
    }

    pub fn push_global_object(&mut self) -> usize {
        let raw = self.engine.global_object();
        self.push_borrowed(raw)
    }

    /// Pushes the hidden stash, an object scripts cannot reach.
    pub fn push_stash(&mut self) -> usize {
        let raw = match &self.stash {
            Some(stash) => stash.raw(),
            None => self.engine.undefined(),
        };
        self.push_borrowed(raw)
    }

    /// Pushes the receiver of the native call in progress.
    pub fn push_this(&mut self) -> usize {
        let raw = self.this.raw();
        self.push_borrowed(raw)
    }

    /// Pushes the function object of the native call in progress.
    pub fn push_callee(&mut self) -> usize {
        let raw = self.callee.raw();
        self.push_borrowed(raw)
    }

    pub fn push_ref(&mut self, reference: &Persistent) -> usize {
        self.push_owned(reference.raw())
    }

    /// Parses JSON text and pushes the result.
    pub fn push_json(&mut self, text: &str) -> JsResult<usize> {
        let raw = self
            .engine
            .parse_json(text)
            .map_err(|e| self.engine_failure(e))?;
        Ok(self.push_owned(raw))
    }

    // ── Stack shape ──

    pub fn get_top(&self) -> usize {
        self.stack.top()
    }

    /// Grows the frame with `undefined` or shrinks it, releasing what falls off.
    pub fn set_top(&mut self, new_top: usize) {
        self.stack.set_top(new_top);
    }

    pub fn normalize(&self, index: i32) -> JsResult<usize> {
        self.stack
            .normalize(index)
            .map_err(|e| self.stack_failure(e))
    }

    pub fn pop(&mut self, count: usize) -> JsResult<()> {
        self.stack.pop(count).map_err(|e| self.stack_failure(e))
    }

    /// Pushes a copy of the slot at `index`.
    pub fn dup(&mut self, index: i32) -> JsResult<()> {
        let copy = match self.stack.handle(index) {
            Ok(handle) => handle.clone(),
            Err(e) => return Err(self.stack_failure(e)),
        };
        self.stack.push(copy);
        Ok(())
    }

    pub fn insert(&mut self, index: i32) -> JsResult<()> {
        self.stack.insert(index).map_err(|e| self.stack_failure(e))
    }

    pub fn pull(&mut self, index: i32) -> JsResult<()> {
        self.stack.pull(index).map_err(|e| self.stack_failure(e))
    }

    pub fn remove(&mut self, index: i32) -> JsResult<()> {
        self.stack.remove(index).map_err(|e| self.stack_failure(e))
    }

    pub fn replace(&mut self, index: i32) -> JsResult<()> {
        self.stack.replace(index).map_err(|e| self.stack_failure(e))
    }

    // ── Inspection ──

    /// A snapshot of the value at `index`.
    pub fn inspect(&self, index: i32) -> JsResult<JsValue> {
        Ok(self.engine.inspect(self.slot(index)?))
    }

    fn peek(&self, index: i32) -> Option<JsValue> {
        self.stack.get(index).ok().map(|raw| self.engine.inspect(raw))
    }

    pub fn is_undefined(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Undefined))
    }

    pub fn is_null(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Null))
    }

    pub fn is_boolean(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Boolean(_)))
    }

    pub fn is_number(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Number(_)))
    }

    pub fn is_string(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::String(_)))
    }

    pub fn is_symbol(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Symbol(_)))
    }

    pub fn is_object(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Object(_)))
    }

    pub fn is_array(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Object(ObjectClass::Array)))
    }

    pub fn is_function(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Object(ObjectClass::Function)))
    }

    pub fn is_error(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Object(ObjectClass::Error)))
    }

    pub fn is_buffer(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Object(ObjectClass::Buffer(_))))
    }

    // Lenient getters: a wrong type or a bad index yields a default.

    pub fn get_boolean(&self, index: i32) -> bool {
        matches!(self.peek(index), Some(JsValue::Boolean(true)))
    }

    pub fn get_number(&self, index: i32) -> f64 {
        match self.peek(index) {
            Some(JsValue::Number(n)) => n,
            _ => f64::NAN,
        }
    }

    pub fn get_int(&self, index: i32) -> i32 {
        match self.peek(index) {
            Some(JsValue::Number(n)) => to_int32(n),
            _ => 0,
        }
    }

    pub fn get_uint(&self, index: i32) -> u32 {
        match self.peek(index) {
            Some(JsValue::Number(n)) => to_uint32(n),
            _ => 0,
        }
    }

    pub fn get_string(&self, index: i32) -> Option<String> {
        match self.peek(index) {
            Some(JsValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_buffer(&self, index: i32) -> Option<Vec<u8>> {
        let raw = self.stack.get(index).ok()?;
        self.engine.buffer_bytes(raw)
    }

    /// Length of a string, array or buffer; 0 for anything else.
    pub fn get_length(&self, index: i32) -> usize {
        self.stack
            .get(index)
            .ok()
            .and_then(|raw| self.engine.length_of(raw))
            .unwrap_or(0)
    }

    // Strict getters: a wrong type is a type-mismatch error.

    pub(crate) fn require(
        &self,
        index: i32,
        expected: &str,
        accept: impl Fn(&JsValue) -> bool,
    ) -> JsResult<JsValue> {
        let value = self.engine.inspect(self.slot(index)?);
        if accept(&value) {
            Ok(value)
        } else {
            Err(self.fail(
                ErrorKind::TypeMismatch,
                ErrorType::TypeError,
                &format!(
                    "{} required, found {} (stack index {})",
                    expected,
                    value.type_name(),
                    index
                ),
            ))
        }
    }

    pub fn require_undefined(&self, index: i32) -> JsResult<()> {
        self.require(index, "undefined", |v| matches!(v, JsValue::Undefined))
            .map(|_| ())
    }

    pub fn require_null(&self, index: i32) -> JsResult<()> {
        self.require(index, "null", |v| matches!(v, JsValue::Null))
            .map(|_| ())
    }

    pub fn require_boolean(&self, index: i32) -> JsResult<bool> {
        match self.require(index, "boolean", |v| matches!(v, JsValue::Boolean(_)))? {
            JsValue::Boolean(b) => Ok(b),
            _ => Ok(false),
        }
    }

    pub fn require_number(&self, index: i32) -> JsResult<f64> {
        match self.require(index, "number", |v| matches!(v, JsValue::Number(_)))? {
            JsValue::Number(n) => Ok(n),
            _ => Ok(f64::NAN),
        }
    }

    pub fn require_int(&self, index: i32) -> JsResult<i32> {
        Ok(to_int32(self.require_number(index)?))
    }

    pub fn require_uint(&self, index: i32) -> JsResult<u32> {
        Ok(to_uint32(self.require_number(index)?))
    }

    pub fn require_string(&self, index: i32) -> JsResult<String> {
        match self.require(index, "string", |v| matches!(v, JsValue::String(_)))? {
            JsValue::String(s) => Ok(s),
            _ => Ok(String::new()),
        }
    }

    pub fn require_symbol(&self, index: i32) -> JsResult<()> {
        self.require(index, "symbol", |v| matches!(v, JsValue::Symbol(_)))
            .map(|_| ())
    }

    pub fn require_object(&self, index: i32) -> JsResult<()> {
        self.require(index, "object", JsValue::is_object_like)
            .map(|_| ())
    }

    /// Anything but `undefined` and `null`.
    pub fn require_object_coercible(&self, index: i32) -> JsResult<()> {
        self.require(index, "object coercible value", |v| !v.is_nullish())
            .map(|_| ())
    }

    pub fn require_array(&self, index: i32) -> JsResult<()> {
        self.require(index, "array", |v| {
            matches!(v, JsValue::Object(ObjectClass::Array))
        })
        .map(|_| ())
    }

    pub fn require_function(&self, index: i32) -> JsResult<()> {
        self.require(index, "function", JsValue::is_function)
            .map(|_| ())
    }

    pub fn require_buffer(&self, index: i32) -> JsResult<Vec<u8>> {
        self.require(index, "buffer", |v| {
            matches!(v, JsValue::Object(ObjectClass::Buffer(_)))
        })?;
        let raw = self.slot(index)?;
        Ok(self.engine.buffer_bytes(raw).unwrap_or_default())
    }

    /// Copies `data` into the buffer at `index`, starting at byte `offset`.
    pub fn write_buffer(&mut self, index: i32, offset: usize, data: &[u8]) -> JsResult<()> {
        self.require(index, "buffer", |v| {
            matches!(v, JsValue::Object(ObjectClass::Buffer(_)))
        })?;
        let raw = self.slot(index)?;
        self.engine
            .write_buffer(raw, offset, data)
            .map_err(|e| self.engine_failure(e))
    }

    // ── In-place conversions ──

    pub fn to_boolean(&mut self, index: i32) -> JsResult<bool> {
        let b = self.engine.to_boolean(self.slot(index)?);
        let raw = self.engine.create_boolean(b);
        self.set_slot(index, raw)?;
        Ok(b)
    }

    pub fn to_number(&mut self, index: i32) -> JsResult<f64> {
        let raw = self.slot(index)?;
        let n = self
            .engine
            .to_number(raw)
            .map_err(|e| self.engine_failure(e))?;
        let converted = self.engine.create_number(n);
        self.set_slot(index, converted)?;
        Ok(n)
    }

    /// Converts to a number, then to a 32-bit integer the way script bitwise
    /// operators do: wrapping modulo 2^32, `NaN` and infinities becoming 0.
    pub fn to_int(&mut self, index: i32) -> JsResult<i32> {
        let n = self.to_number(index)?;
        let i = to_int32(n);
        let raw = self.engine.create_number(i as f64);
        self.set_slot(index, raw)?;
        Ok(i)
    }

    /// Replaces a primitive with its object wrapper. `undefined` and `null`
    /// fail with a `TypeError`.
    pub fn to_object(&mut self, index: i32) -> JsResult<()> {
        let raw = self.slot(index)?;
        let object = self
            .engine
            .to_object(raw)
            .map_err(|e| self.engine_failure(e))?;
        self.set_slot(index, object)
    }

    pub fn to_string(&mut self, index: i32) -> JsResult<String> {
        let raw = self.slot(index)?;
        let s = self
            .engine
            .to_display_string(raw)
            .map_err(|e| self.engine_failure(e))?;
        let converted = self.engine.create_string(&s);
        self.set_slot(index, converted)?;
        Ok(s)
    }

    /// Replaces the value with its JSON text, or `undefined` when JSON has no
    /// representation for it.
    pub fn stringify(&mut self, index: i32) -> JsResult<()> {
        let raw = self.slot(index)?;
        let json = self
            .engine
            .stringify_json(raw)
            .map_err(|e| self.engine_failure(e))?;
        let converted = match json {
            Some(text) => self.engine.create_string(&text),
            None => self.engine.undefined(),
        };
        self.set_slot(index, converted)
    }

    /// Replaces a JSON string with the value it encodes.
    pub fn parse(&mut self, index: i32) -> JsResult<()> {
        let text = self.require_string(index)?;
        let parsed = self
            .engine
            .parse_json(&text)
            .map_err(|e| self.engine_failure(e))?;
        self.set_slot(index, parsed)
    }

    /// Strict equality; false when either index is invalid.
    pub fn equal(&self, a: i32, b: i32) -> bool {
        match (self.stack.get(a), self.stack.get(b)) {
            (Ok(x), Ok(y)) => self.engine.strict_equals(x, y),
            _ => false,
        }
    }

    // ── Properties ──

    pub(crate) fn key_at(&self, index: i32) -> JsResult<PropertyKey> {
        let raw = self.slot(index)?;
        Ok(match self.engine.inspect(raw) {
            JsValue::String(s) => PropertyKey::Str(s),
            JsValue::Symbol(_) => PropertyKey::Symbol(raw),
            JsValue::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => {
                PropertyKey::Index(n as u32)
            }
            _ => PropertyKey::Str(
                self.engine
                    .to_display_string(raw)
                    .map_err(|e| self.engine_failure(e))?,
            ),
        })
    }

    pub(crate) fn read_property(&mut self, object: RawValue, key: &PropertyKey) -> JsResult<RawValue> {
        let engine = Rc::clone(&self.engine);
        engine
            .get_property(self, object, key)
            .map_err(|e| self.engine_failure(e))
    }

    /// `[... key] -> [... value]`; true when the property is not `undefined`.
    pub fn get_prop(&mut self, object_index: i32) -> JsResult<bool> {
        let object = self.slot(object_index)?;
        let key = self.key_at(-1)?;
        let value = self.read_property(object, &key)?;
        self.set_slot(-1, value)?;
        Ok(!self.is_undefined(-1))
    }

    /// Pushes `object[name]`; true when it is not `undefined`.
    pub fn get_prop_string(&mut self, object_index: i32, name: &str) -> JsResult<bool> {
        let object = self.slot(object_index)?;
        let value = self.read_property(object, &PropertyKey::from(name))?;
        self.push_owned(value);
        Ok(!self.is_undefined(-1))
    }

    pub fn get_prop_index(&mut self, object_index: i32, index: u32) -> JsResult<bool> {
        let object = self.slot(object_index)?;
        let value = self.read_property(object, &PropertyKey::Index(index))?;
        self.push_owned(value);
        Ok(!self.is_undefined(-1))
    }

    pub(crate) fn write_property(&mut self, object: RawValue, key: &PropertyKey, value: RawValue) -> JsResult<()> {
        let engine = Rc::clone(&self.engine);
        engine
            .set_property(self, object, key, value)
            .map_err(|e| self.engine_failure(e))
    }

    /// `[... key value] -> [...]`
    pub fn put_prop(&mut self, object_index: i32) -> JsResult<()> {
        let object = self.slot(object_index)?;
        let key = self.key_at(-2)?;
        let value = self.slot(-1)?;
        self.write_property(object, &key, value)?;
        self.pop(2)
    }

    /// `[... value] -> [...]`
    pub fn put_prop_string(&mut self, object_index: i32, name: &str) -> JsResult<()> {
        let object = self.slot(object_index)?;
        let value = self.slot(-1)?;
        self.write_property(object, &PropertyKey::from(name), value)?;
        self.pop(1)
    }

    pub fn put_prop_index(&mut self, object_index: i32, index: u32) -> JsResult<()> {
        let object = self.slot(object_index)?;
        let value = self.slot(-1)?;
        self.write_property(object, &PropertyKey::Index(index), value)?;
        self.pop(1)
    }

    /// `[... key] -> [...]`
    pub fn has_prop(&mut self, object_index: i32) -> JsResult<bool> {
        let object = self.slot(object_index)?;
        let key = self.key_at(-1)?;
        let found = self
            .engine
            .has_property(object, &key)
            .map_err(|e| self.engine_failure(e))?;
        self.pop(1)?;
        Ok(found)
    }

    pub fn has_prop_string(&mut self, object_index: i32, name: &str) -> JsResult<bool> {
        let object = self.slot(object_index)?;
        self.engine
            .has_property(object, &PropertyKey::from(name))
            .map_err(|e| self.engine_failure(e))
    }

    /// `[... key] -> [...]`
    pub fn del_prop(&mut self, object_index: i32) -> JsResult<bool> {
        let object = self.slot(object_index)?;
        let key = self.key_at(-1)?;
        let deleted = self
            .engine
            .delete_property(object, &key)
            .map_err(|e| self.engine_failure(e))?;
        self.pop(1)?;
        Ok(deleted)
    }

    pub fn del_prop_string(&mut self, object_index: i32, name: &str) -> JsResult<bool> {
        let object = self.slot(object_index)?;
        self.engine
            .delete_property(object, &PropertyKey::from(name))
            .map_err(|e| self.engine_failure(e))
    }

    pub fn get_global_string(&mut self, name: &str) -> JsResult<bool> {
        let global = self.engine.global_object();
        let value = self.read_property(global, &PropertyKey::from(name))?;
        self.push_owned(value);
        Ok(!self.is_undefined(-1))
    }

    /// `[... value] -> [...]`
    pub fn put_global_string(&mut self, name: &str) -> JsResult<()> {
        let global = self.engine.global_object();
        let value = self.slot(-1)?;
        self.write_property(global, &PropertyKey::from(name), value)?;
        self.pop(1)
    }

    pub fn del_global_string(&mut self, name: &str) -> JsResult<bool> {
        let global = self.engine.global_object();
        self.engine
            .delete_property(global, &PropertyKey::from(name))
            .map_err(|e| self.engine_failure(e))
    }

    /// Pushes the prototype of the object at `index` (`null` if it has none).
    pub fn get_prototype(&mut self, index: i32) -> JsResult<()> {
        let object = self.slot(index)?;
        let prototype = self
            .engine
            .get_prototype(object)
            .map_err(|e| self.engine_failure(e))?;
        self.push_owned(prototype);
        Ok(())
    }

    /// `[... prototype] -> [...]`
    pub fn set_prototype(&mut self, index: i32) -> JsResult<()> {
        let object = self.slot(index)?;
        let prototype = self.slot(-1)?;
        self.engine
            .set_prototype(object, prototype)
            .map_err(|e| self.engine_failure(e))?;
        self.pop(1)
    }

    /// Own enumerable string keys, in insertion order.
    pub fn own_keys(&self, index: i32) -> JsResult<Vec<String>> {
        let object = self.slot(index)?;
        self.engine
            .own_property_keys(object)
            .map_err(|e| self.engine_failure(e))
    }

    // ── References ──

    /// Exports the slot as a reference that outlives it.
    pub fn ref_value(&self, index: i32) -> JsResult<Persistent> {
        let raw = self.slot(index)?;
        Ok(Persistent::new(Owned::new(&self.engine, raw)))
    }
}
