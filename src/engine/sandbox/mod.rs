//! An in-process script engine for a small ECMAScript subset.
//!
//! The dialect covers what the host layer needs to be exercised end to end:
//! `let`/`const`/`var`, function declarations and expressions, calls and
//! `new`, member access and assignment, `+ - * /`, strict equality, `!`,
//! `if`/`else`, `throw`, `return`, `debugger`, object and array literals,
//! static `import`/`export` and dynamic `import()`.
//!
//! Values live in a reference-counted [`heap::Heap`]. Unreferenced values are
//! only reclaimed by [`Engine::collect_garbage`], which refuses to run while
//! script is on the stack.

mod ast;
mod diag;
mod heap;
mod interp;
mod json;
mod module;
mod parser;
mod values;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, trace};

use self::diag::DiagState;
use self::heap::{Attributes, CellData, Heap, Internal, Key, Slot, FALSE, NULL, TRUE, UNDEFINED};
use self::interp::{Flow, Frame, Scope, ScopeRef, Thrown};
use self::module::ModuleEntry;
use self::parser::{parse_expression, parse_program, Goal};
use self::values::{Lookup, Store};
use super::{
    DiagBreakpoint, DiagFrame, DiagProperty, Engine, EngineError, EngineHost, EngineResult,
    Finalizer, FunctionId, ModuleId, PropertyDescriptor, RawValue, ScriptInfo, SourceContext,
    StepType,
};
use crate::runner::ds::error::ErrorType;
use crate::runner::ds::value::{BufferType, JsValue, ObjectClass, PropertyKey};

pub struct SandboxEngine {
    heap: RefCell<Heap>,
    global: Cell<RawValue>,
    object_prototype: Cell<RawValue>,
    global_scope: RefCell<ScopeRef>,
    exception: Cell<Option<RawValue>>,
    frames: RefCell<Vec<Frame>>,
    modules: RefCell<Vec<ModuleEntry>>,
    diag: RefCell<DiagState>,
    depth: Cell<usize>,
    disabled: Cell<bool>,
}

/// Marks script as running until dropped.
struct Entry<'a> {
    engine: &'a SandboxEngine,
}

impl Drop for Entry<'_> {
    fn drop(&mut self) {
        self.engine.depth.set(self.engine.depth.get() - 1);
    }
}

impl Default for SandboxEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxEngine {
    pub fn new() -> Self {
        let engine = SandboxEngine {
            heap: RefCell::new(Heap::new()),
            global: Cell::new(UNDEFINED),
            object_prototype: Cell::new(UNDEFINED),
            global_scope: RefCell::new(Scope::new_ref(None)),
            exception: Cell::new(None),
            frames: RefCell::new(vec![]),
            modules: RefCell::new(vec![]),
            diag: RefCell::new(DiagState::default()),
            depth: Cell::new(0),
            disabled: Cell::new(false),
        };
        engine.install_globals();
        engine
    }

    fn install_globals(&self) {
        let global = self.alloc_object(ObjectClass::Plain, Internal::None);
        let prototype = self.alloc_object(ObjectClass::Plain, Internal::None);
        self.global.set(global);
        self.object_prototype.set(prototype);
        for kind in ErrorType::ALL.iter() {
            let ctor = self.alloc_object(ObjectClass::Function, Internal::ErrorConstructor(*kind));
            let name = self.alloc(CellData::Str(kind.name().to_string()));
            let mut heap = self.heap.borrow_mut();
            if let Some(o) = heap.object_mut(ctor) {
                o.set(Key::Name("name".to_string()), name);
            }
            if let Some(o) = heap.object_mut(global) {
                o.set(Key::Name(kind.name().to_string()), ctor);
            }
        }
        if let Some(o) = self.heap.borrow_mut().object_mut(global) {
            o.set(Key::Name("globalThis".to_string()), global);
        }
    }

    fn enter(&self) -> Entry<'_> {
        if self.depth.get() == 0 {
            self.diag.borrow_mut().new_entry();
        }
        self.depth.set(self.depth.get() + 1);
        Entry { engine: self }
    }

    fn check_enabled(&self) -> EngineResult<()> {
        if self.disabled.get() {
            Err(EngineError::Disabled)
        } else {
            Ok(())
        }
    }

    /// Parks a thrown value as the pending exception.
    fn finish<T>(&self, result: Flow<T>) -> EngineResult<T> {
        result.map_err(|Thrown(value)| {
            self.exception.set(Some(value));
            EngineError::Exception
        })
    }

    fn pending_error(&self, kind: ErrorType, message: &str) -> EngineError {
        let error = self.new_error(kind, message);
        self.exception.set(Some(error));
        EngineError::Exception
    }

    fn require_object(&self, value: RawValue, what: &str) -> EngineResult<()> {
        match self.inspect_value(value) {
            JsValue::Object(_) => Ok(()),
            other => Err(self.pending_error(
                ErrorType::TypeError,
                &format!("cannot {} of {}", what, other.type_name()),
            )),
        }
    }

    fn require_callable(&self, value: Option<RawValue>, what: &str) -> EngineResult<()> {
        match value {
            Some(f) if !self.is_callable(f) => Err(self.pending_error(
                ErrorType::TypeError,
                &format!("{} must be a function", what),
            )),
            _ => Ok(()),
        }
    }

    fn to_key(key: &PropertyKey) -> Key {
        match key {
            PropertyKey::Str(s) => Key::Name(s.clone()),
            PropertyKey::Index(i) => Key::Name(i.to_string()),
            PropertyKey::Symbol(s) => Key::Symbol(*s),
        }
    }

    fn compile_script(&self, host: &mut dyn EngineHost, source: &str, filename: &str) -> EngineResult<RawValue> {
        let script_id = self.register_script(host, filename, source);
        let program = match parse_program(source, Goal::Script) {
            Ok(p) => p,
            Err(e) => {
                debug!("compile of {} failed: {}", filename, e);
                let error = self.new_error(ErrorType::SyntaxError, &format!("{} in {}", e, filename));
                self.exception.set(Some(error));
                return Err(EngineError::Compile);
            }
        };
        let function = self.alloc_object(
            ObjectClass::Function,
            Internal::CompiledScript {
                program: Rc::new(program),
                script_id,
            },
        );
        let name = self.alloc(CellData::Str(filename.to_string()));
        if let Some(o) = self.heap.borrow_mut().object_mut(function) {
            o.set(Key::Name("name".to_string()), name);
        }
        Ok(function)
    }

    fn gc_roots(&self) -> (Vec<RawValue>, Vec<ScopeRef>) {
        let mut roots = vec![self.global.get(), self.object_prototype.get()];
        roots.extend(self.exception.get());
        let mut scopes = vec![Rc::clone(&self.global_scope.borrow())];
        for m in self.modules.borrow().iter() {
            roots.push(m.namespace);
            roots.extend(m.exception);
            scopes.push(Rc::clone(&m.scope));
        }
        for f in self.frames.borrow().iter() {
            roots.push(f.function);
            roots.push(f.this);
            scopes.push(Rc::clone(&f.scope));
        }
        (roots, scopes)
    }
}

impl Engine for SandboxEngine {
    fn name(&self) -> &str {
        "sandbox"
    }

    fn undefined(&self) -> RawValue {
        UNDEFINED
    }

    fn null(&self) -> RawValue {
        NULL
    }

    fn global_object(&self) -> RawValue {
        self.global.get()
    }

    fn create_boolean(&self, value: bool) -> RawValue {
        if value {
            TRUE
        } else {
            FALSE
        }
    }

    fn create_number(&self, value: f64) -> RawValue {
        self.alloc(CellData::Number(value))
    }

    fn create_string(&self, value: &str) -> RawValue {
        self.alloc(CellData::Str(value.to_string()))
    }

    fn create_symbol(&self, description: &str) -> RawValue {
        self.alloc(CellData::Symbol(description.to_string()))
    }

    fn create_object(&self) -> RawValue {
        let object = self.alloc_object(ObjectClass::Plain, Internal::None);
        let prototype = self.object_prototype.get();
        if let Some(o) = self.heap.borrow_mut().object_mut(object) {
            o.prototype = Some(prototype);
        }
        object
    }

    fn create_bare_object(&self) -> RawValue {
        self.alloc_object(ObjectClass::Plain, Internal::None)
    }

    fn create_array(&self) -> RawValue {
        self.alloc_object(ObjectClass::Array, Internal::None)
    }

    fn create_buffer(&self, kind: BufferType, length: usize) -> RawValue {
        self.alloc_object(
            ObjectClass::Buffer(kind),
            Internal::Buffer(kind, vec![0; length * kind.element_size()]),
        )
    }

    fn create_error(&self, kind: ErrorType, message: &str) -> RawValue {
        self.new_error(kind, message)
    }

    fn create_host_function(&self, name: &str, function: FunctionId) -> RawValue {
        let f = self.alloc_object(ObjectClass::Function, Internal::HostFunction(function));
        let name = self.alloc(CellData::Str(name.to_string()));
        if let Some(o) = self.heap.borrow_mut().object_mut(f) {
            o.set(Key::Name("name".to_string()), name);
        }
        f
    }

    fn inspect(&self, value: RawValue) -> JsValue {
        self.inspect_value(value)
    }

    fn to_boolean(&self, value: RawValue) -> bool {
        self.truthy(value)
    }

    fn to_number(&self, value: RawValue) -> EngineResult<f64> {
        self.number_of(value)
            .map_err(|m| self.pending_error(ErrorType::TypeError, &m))
    }

    fn to_display_string(&self, value: RawValue) -> EngineResult<String> {
        Ok(self.display(value))
    }

    fn strict_equals(&self, a: RawValue, b: RawValue) -> bool {
        self.same_value(a, b)
    }

    fn to_object(&self, value: RawValue) -> EngineResult<RawValue> {
        match self.inspect_value(value) {
            JsValue::Object(_) => Ok(value),
            v if v.is_nullish() => Err(self.pending_error(
                ErrorType::TypeError,
                &format!("cannot convert {} to object", v.type_name()),
            )),
            _ => {
                let object = self.alloc_object(ObjectClass::Plain, Internal::Boxed(value));
                let prototype = self.object_prototype.get();
                if let Some(o) = self.heap.borrow_mut().object_mut(object) {
                    o.prototype = Some(prototype);
                }
                Ok(object)
            }
        }
    }

    fn length_of(&self, value: RawValue) -> Option<usize> {
        match self.lookup(value, &Key::Name("length".to_string())) {
            Lookup::Number(n) => Some(n as usize),
            _ => None,
        }
    }

    fn buffer_bytes(&self, value: RawValue) -> Option<Vec<u8>> {
        match self.heap.borrow().object(value).map(|o| &o.internal) {
            Some(Internal::Buffer(_, data)) => Some(data.clone()),
            _ => None,
        }
    }

    fn write_buffer(&self, value: RawValue, offset: usize, data: &[u8]) -> EngineResult<()> {
        let mut heap = self.heap.borrow_mut();
        match heap.object_mut(value).map(|o| &mut o.internal) {
            Some(Internal::Buffer(_, bytes)) => {
                let end = offset
                    .checked_add(data.len())
                    .filter(|end| *end <= bytes.len())
                    .ok_or_else(|| {
                        EngineError::InvalidArgument(format!(
                            "write of {} bytes at {} overflows a buffer of {}",
                            data.len(),
                            offset,
                            bytes.len()
                        ))
                    })?;
                bytes[offset..end].copy_from_slice(data);
                Ok(())
            }
            _ => Err(EngineError::InvalidArgument("value is not a buffer".to_string())),
        }
    }

    fn parse_json(&self, text: &str) -> EngineResult<RawValue> {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => Ok(self.from_json(&value)),
            Err(e) => Err(self.pending_error(ErrorType::SyntaxError, &format!("invalid JSON: {}", e))),
        }
    }

    fn stringify_json(&self, value: RawValue) -> EngineResult<Option<String>> {
        match self.to_json(value, 0) {
            Ok(Some(json)) => serde_json::to_string(&json)
                .map(Some)
                .map_err(|e| self.pending_error(ErrorType::TypeError, &e.to_string())),
            Ok(None) => Ok(None),
            Err(m) => Err(self.pending_error(ErrorType::TypeError, &m)),
        }
    }

    fn add_ref(&self, value: RawValue) -> u32 {
        self.heap.borrow_mut().add_ref(value)
    }

    fn release(&self, value: RawValue) -> u32 {
        self.heap.borrow_mut().release(value)
    }

    fn ref_count(&self, value: RawValue) -> u32 {
        self.heap.borrow().ref_count(value)
    }

    fn collect_garbage(&self) -> usize {
        if self.depth.get() > 0 {
            trace!("garbage collection skipped while script is running");
            return 0;
        }
        let (roots, scopes) = self.gc_roots();
        let freed = self.heap.borrow_mut().collect(roots, scopes);
        let finalizations = self.heap.borrow_mut().take_finalizations();
        trace!(
            "garbage collection freed {} cells, {} finalizers to run",
            freed,
            finalizations.len()
        );
        for f in finalizations {
            f.run();
        }
        freed
    }

    fn get_property(
        &self,
        host: &mut dyn EngineHost,
        object: RawValue,
        key: &PropertyKey,
    ) -> EngineResult<RawValue> {
        if self.inspect_value(object).is_nullish() {
            return Err(self.pending_error(
                ErrorType::TypeError,
                &format!(
                    "cannot read property '{}' of {}",
                    key,
                    self.inspect_value(object).type_name()
                ),
            ));
        }
        let key = Self::to_key(key);
        if self.getter_of(object, &key).is_some() {
            self.check_enabled()?;
        }
        let _entry = self.enter();
        self.finish(self.read_prop(host, object, &key))
            .map(|v| v.unwrap_or(UNDEFINED))
    }

    fn set_property(
        &self,
        host: &mut dyn EngineHost,
        object: RawValue,
        key: &PropertyKey,
        value: RawValue,
    ) -> EngineResult<()> {
        match self.put_prop(object, Self::to_key(key), value) {
            Ok(Store::Done) => Ok(()),
            Ok(Store::Setter(setter)) => {
                self.check_enabled()?;
                let _entry = self.enter();
                self.finish(self.call_value(host, setter, object, &[value]))
                    .map(|_| ())
            }
            Err(m) => Err(self.pending_error(ErrorType::TypeError, &m)),
        }
    }

    fn define_property(
        &self,
        object: RawValue,
        key: &PropertyKey,
        descriptor: PropertyDescriptor,
    ) -> EngineResult<()> {
        self.require_object(object, "define a property")?;
        self.require_callable(descriptor.getter, "getter")?;
        self.require_callable(descriptor.setter, "setter")?;
        let key = Self::to_key(key);
        let locked = self
            .heap
            .borrow()
            .object(object)
            .and_then(|o| o.property(&key))
            .map_or(false, |p| !p.attributes.configurable);
        if locked {
            return Err(self.pending_error(
                ErrorType::TypeError,
                &format!("cannot redefine property '{}'", key),
            ));
        }
        let slot = if descriptor.is_accessor() {
            Slot::Accessor {
                getter: descriptor.getter,
                setter: descriptor.setter,
            }
        } else {
            Slot::Data(descriptor.value.unwrap_or(UNDEFINED))
        };
        let attributes = Attributes {
            writable: descriptor.writable && !descriptor.is_accessor(),
            enumerable: descriptor.enumerable,
            configurable: descriptor.configurable,
        };
        if let Some(o) = self.heap.borrow_mut().object_mut(object) {
            o.define(key, slot, attributes);
        }
        Ok(())
    }

    fn has_property(&self, object: RawValue, key: &PropertyKey) -> EngineResult<bool> {
        self.require_object(object, "search for a property")?;
        Ok(self.has_prop(object, &Self::to_key(key)))
    }

    fn delete_property(&self, object: RawValue, key: &PropertyKey) -> EngineResult<bool> {
        if self.inspect_value(object).is_nullish() {
            self.require_object(object, "delete a property")?;
        }
        let key = Self::to_key(key);
        Ok(match self.heap.borrow_mut().object_mut(object) {
            Some(o) => match o.property(&key) {
                Some(p) if !p.attributes.configurable => false,
                _ => {
                    o.remove(&key);
                    true
                }
            },
            None => true,
        })
    }

    fn own_property_keys(&self, object: RawValue) -> EngineResult<Vec<String>> {
        self.require_object(object, "list the keys")?;
        Ok(self
            .heap
            .borrow()
            .object(object)
            .map(|o| o.names())
            .unwrap_or_default())
    }

    fn get_prototype(&self, object: RawValue) -> EngineResult<RawValue> {
        self.require_object(object, "read the prototype")?;
        Ok(self
            .heap
            .borrow()
            .object(object)
            .and_then(|o| o.prototype)
            .unwrap_or(NULL))
    }

    fn set_prototype(&self, object: RawValue, prototype: RawValue) -> EngineResult<()> {
        self.require_object(object, "set the prototype")?;
        let prototype = match self.inspect_value(prototype) {
            JsValue::Null => None,
            JsValue::Object(_) => Some(prototype),
            other => {
                return Err(self.pending_error(
                    ErrorType::TypeError,
                    &format!("prototype must be an object or null, not {}", other.type_name()),
                ))
            }
        };
        let mut cursor = prototype;
        while let Some(p) = cursor {
            if p == object {
                return Err(self.pending_error(ErrorType::TypeError, "cyclic prototype chain"));
            }
            cursor = self.heap.borrow().object(p).and_then(|o| o.prototype);
        }
        if let Some(o) = self.heap.borrow_mut().object_mut(object) {
            o.prototype = prototype;
        }
        Ok(())
    }

    fn set_host_data(&self, object: RawValue, data: Option<Rc<dyn Any>>) -> EngineResult<()> {
        self.require_object(object, "attach host data")?;
        if let Some(o) = self.heap.borrow_mut().object_mut(object) {
            o.host_data = data;
        }
        Ok(())
    }

    fn host_data(&self, object: RawValue) -> Option<Rc<dyn Any>> {
        self.heap
            .borrow()
            .object(object)
            .and_then(|o| o.host_data.clone())
    }

    fn set_finalizer(&self, object: RawValue, finalizer: Option<Finalizer>) -> EngineResult<()> {
        self.require_object(object, "attach a finalizer")?;
        if let Some(o) = self.heap.borrow_mut().object_mut(object) {
            o.finalizer = finalizer;
        }
        Ok(())
    }

    fn call_function(
        &self,
        host: &mut dyn EngineHost,
        function: RawValue,
        this: RawValue,
        args: &[RawValue],
    ) -> EngineResult<RawValue> {
        self.check_enabled()?;
        let _entry = self.enter();
        self.finish(self.call_value(host, function, this, args))
    }

    fn construct(
        &self,
        host: &mut dyn EngineHost,
        constructor: RawValue,
        args: &[RawValue],
    ) -> EngineResult<RawValue> {
        self.check_enabled()?;
        let _entry = self.enter();
        self.finish(self.construct_value(host, constructor, args, "value"))
    }

    fn has_exception(&self) -> bool {
        self.exception.get().is_some()
    }

    fn take_exception(&self) -> Option<RawValue> {
        self.exception.take()
    }

    fn set_exception(&self, value: RawValue) {
        self.exception.set(Some(value));
    }

    fn compile(
        &self,
        host: &mut dyn EngineHost,
        source: &str,
        filename: &str,
        _context: SourceContext,
    ) -> EngineResult<RawValue> {
        self.check_enabled()?;
        let _entry = self.enter();
        self.compile_script(host, source, filename)
    }

    fn run(
        &self,
        host: &mut dyn EngineHost,
        source: &str,
        filename: &str,
        _context: SourceContext,
    ) -> EngineResult<RawValue> {
        self.check_enabled()?;
        let _entry = self.enter();
        let function = self.compile_script(host, source, filename)?;
        self.finish(self.call_value(host, function, UNDEFINED, &[]))
    }

    fn create_module(&self, parent: Option<ModuleId>, specifier: &str) -> ModuleId {
        self.new_module(parent, specifier)
    }

    fn parse_module(
        &self,
        host: &mut dyn EngineHost,
        module: ModuleId,
        source: &str,
        filename: &str,
        _context: SourceContext,
    ) -> EngineResult<()> {
        self.check_enabled()?;
        let _entry = self.enter();
        self.parse_module_source(host, module, source, filename)
    }

    fn evaluate_module(&self, host: &mut dyn EngineHost, module: ModuleId) -> EngineResult<RawValue> {
        self.check_enabled()?;
        let _entry = self.enter();
        self.finish(self.evaluate_record(host, module))?;
        self.module_namespace(module)
    }

    fn module_namespace(&self, module: ModuleId) -> EngineResult<RawValue> {
        self.namespace_of(module)
            .ok_or_else(|| EngineError::InvalidArgument(format!("no module {}", module.0)))
    }

    fn set_module_exception(&self, module: ModuleId, exception: RawValue) {
        self.store_module_exception(module, exception);
    }

    fn module_exception(&self, module: ModuleId) -> Option<RawValue> {
        self.exception_of(module)
    }

    fn reset(&self) {
        debug!("resetting sandbox engine");
        let old = std::mem::replace(&mut *self.heap.borrow_mut(), Heap::new());
        drop(old);
        *self.global_scope.borrow_mut() = Scope::new_ref(None);
        self.exception.set(None);
        self.frames.borrow_mut().clear();
        self.modules.borrow_mut().clear();
        {
            let mut diag = self.diag.borrow_mut();
            let debugging = diag.debugging;
            let break_on_uncaught = diag.break_on_uncaught;
            *diag = DiagState::default();
            diag.debugging = debugging;
            diag.break_on_uncaught = break_on_uncaught;
        }
        self.install_globals();
    }

    fn set_disabled(&self, disabled: bool) {
        self.disabled.set(disabled);
    }

    fn is_disabled(&self) -> bool {
        self.disabled.get()
    }

    fn start_debugging(&self) -> EngineResult<()> {
        self.diag.borrow_mut().debugging = true;
        Ok(())
    }

    fn stop_debugging(&self) {
        self.diag.borrow_mut().stop();
    }

    fn is_debugging(&self) -> bool {
        self.diag.borrow().debugging
    }

    fn set_break_on_exception(&self, uncaught: bool) {
        self.diag.borrow_mut().break_on_uncaught = uncaught;
    }

    fn scripts(&self) -> Vec<ScriptInfo> {
        self.diag.borrow().script_infos()
    }

    fn script_source(&self, script_id: u32) -> Option<String> {
        self.diag
            .borrow()
            .scripts
            .iter()
            .find(|s| s.id == script_id)
            .map(|s| s.source.clone())
    }

    fn set_breakpoint(&self, script_id: u32, line: u32, column: u32) -> EngineResult<u32> {
        self.diag.borrow_mut().add_breakpoint(script_id, line, column)
    }

    fn remove_breakpoint(&self, id: u32) -> EngineResult<()> {
        self.diag.borrow_mut().remove_breakpoint(id)
    }

    fn breakpoints(&self) -> Vec<DiagBreakpoint> {
        self.diag.borrow().breakpoints.clone()
    }

    fn request_async_break(&self) {
        let mut diag = self.diag.borrow_mut();
        if diag.debugging {
            diag.async_break = true;
        }
    }

    fn step_type(&self) -> StepType {
        self.diag.borrow().step_type
    }

    fn set_step_type(&self, step: StepType) {
        self.diag.borrow_mut().step_type = step;
    }

    fn stack_trace(&self) -> EngineResult<Vec<DiagFrame>> {
        if !self.is_debugging() {
            return Err(EngineError::NotDebugging);
        }
        Ok(self.frame_trace())
    }

    fn stack_properties(&self, frame: usize) -> EngineResult<Vec<DiagProperty>> {
        if !self.is_debugging() {
            return Err(EngineError::NotDebugging);
        }
        self.frame_locals(frame)
    }

    fn object_properties(&self, handle: u32, from: usize, count: usize) -> EngineResult<Vec<DiagProperty>> {
        if !self.is_debugging() {
            return Err(EngineError::NotDebugging);
        }
        self.handle_properties(handle, from, count)
    }

    fn evaluate_in_frame(
        &self,
        host: &mut dyn EngineHost,
        source: &str,
        frame: usize,
    ) -> EngineResult<(DiagProperty, bool)> {
        if !self.is_debugging() {
            return Err(EngineError::NotDebugging);
        }
        let expr = match parse_expression(source) {
            Ok(expr) => expr,
            Err(e) => {
                let error = self.new_error(ErrorType::SyntaxError, &e.to_string());
                return Ok((self.describe(source, error), true));
            }
        };
        let (scope, this, script_id) = {
            let frames = self.frames.borrow();
            let n = frames.len();
            if frame >= n {
                return Err(EngineError::InvalidArgument(format!("no frame {}", frame)));
            }
            let f = &frames[n - 1 - frame];
            (Rc::clone(&f.scope), f.this, f.script_id)
        };
        let cx = interp::Cx {
            scope,
            this,
            script_id,
            exports: None,
        };
        let _entry = self.enter();
        Ok(match self.eval(host, &expr, &cx) {
            Ok(v) => (self.describe(source, v), false),
            Err(Thrown(e)) => (self.describe(source, e), true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DebugEvent, NativeCall};

    /// A host that serves nothing and records what it is told.
    #[derive(Default)]
    struct RecordingHost {
        events: Vec<DebugEvent>,
        ready: Vec<(ModuleId, bool)>,
    }

    impl EngineHost for RecordingHost {
        fn call_native(&mut self, call: NativeCall<'_>) -> Result<RawValue, RawValue> {
            Ok(call.args.first().copied().unwrap_or(UNDEFINED))
        }

        fn fetch_imported_module(&mut self, importer: ModuleId, _specifier: &str) -> ModuleId {
            importer
        }

        fn fetch_dynamic_import(&mut self, _specifier: &str) -> ModuleId {
            ModuleId(0)
        }

        fn notify_module_ready(&mut self, module: ModuleId, exception: Option<RawValue>) {
            self.ready.push((module, exception.is_some()));
        }

        fn debug_event(&mut self, event: DebugEvent) {
            self.events.push(event);
        }
    }

    fn run(engine: &SandboxEngine, source: &str) -> EngineResult<RawValue> {
        engine.run(&mut RecordingHost::default(), source, "test.js", 0)
    }

    #[test]
    fn test_completion_value() {
        let engine = SandboxEngine::new();
        let v = run(&engine, "let a = 40; function add(x, y) { return x + y; } add(a, 2);").unwrap();
        assert_eq!(engine.inspect(v), JsValue::Number(42.0));
    }

    #[test]
    fn test_string_concatenation_and_equality() {
        let engine = SandboxEngine::new();
        let v = run(&engine, "'a' + 1 + 2 === 'a12'").unwrap();
        assert_eq!(engine.inspect(v), JsValue::Boolean(true));
    }

    #[test]
    fn test_closures_capture_scope() {
        let engine = SandboxEngine::new();
        let source = "function counter() { let n = 0; return function() { n = n + 1; return n; }; }
                      let c = counter(); c(); c();";
        let v = run(&engine, source).unwrap();
        assert_eq!(engine.inspect(v), JsValue::Number(2.0));
    }

    #[test]
    fn test_throw_leaves_pending_exception() {
        let engine = SandboxEngine::new();
        assert_eq!(run(&engine, "throw new TypeError('bad');"), Err(EngineError::Exception));
        let e = engine.take_exception().unwrap();
        assert_eq!(engine.display(e), "TypeError: bad");
        assert!(!engine.has_exception());
    }

    #[test]
    fn test_reference_error_for_unknown_names() {
        let engine = SandboxEngine::new();
        assert!(run(&engine, "missing + 1").is_err());
        let e = engine.take_exception().unwrap();
        assert_eq!(engine.display(e), "ReferenceError: missing is not defined");
    }

    #[test]
    fn test_syntax_error_is_compile_error() {
        let engine = SandboxEngine::new();
        assert_eq!(run(&engine, "let = ;"), Err(EngineError::Compile));
        let e = engine.take_exception().unwrap();
        assert_eq!(engine.inspect(e), JsValue::Object(ObjectClass::Error));
    }

    #[test]
    fn test_garbage_collection_respects_references() {
        let engine = SandboxEngine::new();
        let kept = engine.create_string("kept");
        engine.add_ref(kept);
        let _dropped = engine.create_string("dropped");
        assert!(engine.collect_garbage() >= 1);
        assert_eq!(engine.inspect(kept), JsValue::String("kept".to_string()));
        engine.release(kept);
    }

    #[test]
    fn test_json_round_trip_keeps_structure() {
        let engine = SandboxEngine::new();
        let v = engine.parse_json(r#"{"a":[1,2,{"b":null}],"c":"x"}"#).unwrap();
        assert_eq!(
            engine.stringify_json(v).unwrap().as_deref(),
            Some(r#"{"a":[1,2,{"b":null}],"c":"x"}"#)
        );
        assert_eq!(engine.stringify_json(UNDEFINED).unwrap(), None);
        assert!(engine.parse_json("{nope").is_err());
        assert!(engine.take_exception().is_some());
    }

    #[test]
    fn test_typed_buffer_elements() {
        let engine = SandboxEngine::new();
        let buffer = engine.create_buffer(BufferType::Uint16, 2);
        engine.write_buffer(buffer, 0, &[1, 1]).unwrap();
        let first = engine
            .get_property(&mut RecordingHost::default(), buffer, &PropertyKey::Index(0))
            .unwrap();
        assert_eq!(engine.inspect(first), JsValue::Number(257.0));
        assert!(engine.write_buffer(buffer, 3, &[0, 0]).is_err());
    }

    #[test]
    fn test_prototype_cycles_are_rejected() {
        let engine = SandboxEngine::new();
        let a = engine.create_bare_object();
        let b = engine.create_bare_object();
        engine.set_prototype(a, b).unwrap();
        assert!(engine.set_prototype(b, a).is_err());
        engine.take_exception();
    }

    #[test]
    fn test_disabled_engine_refuses_to_run() {
        let engine = SandboxEngine::new();
        engine.set_disabled(true);
        assert_eq!(run(&engine, "1"), Err(EngineError::Disabled));
    }

    #[test]
    fn test_breakpoint_and_step_events() {
        let engine = SandboxEngine::new();
        engine.start_debugging().unwrap();
        let mut host = RecordingHost::default();
        let f = engine
            .compile(&mut host, "let a = 1;\nlet b = 2;\ndebugger;\n", "bp.js", 0)
            .unwrap();
        assert!(matches!(host.events[0], DebugEvent::SourceCompile { script_id: 1, .. }));
        engine.set_breakpoint(1, 1, 0).unwrap();
        engine.call_function(&mut host, f, UNDEFINED, &[]).unwrap();
        assert!(matches!(host.events[1], DebugEvent::Breakpoint(l) if l.line == 1));
        assert!(matches!(host.events[2], DebugEvent::DebuggerStatement(l) if l.line == 2));
    }

    #[test]
    fn test_module_records_notify_roots() {
        let engine = SandboxEngine::new();
        let mut host = RecordingHost::default();
        let root = engine.create_module(None, "main");
        engine
            .parse_module(&mut host, root, "export let answer = 42;", "main.mjs", 0)
            .unwrap();
        assert_eq!(host.ready, vec![(root, false)]);
        let ns = engine.evaluate_module(&mut host, root).unwrap();
        let answer = engine
            .get_property(&mut host, ns, &PropertyKey::Str("answer".to_string()))
            .unwrap();
        assert_eq!(engine.inspect(answer), JsValue::Number(42.0));
    }

    #[test]
    fn test_accessor_runs_script_getter_and_setter() {
        let engine = SandboxEngine::new();
        let mut host = RecordingHost::default();
        let object = run(&engine, "let store = { v: 1 }; store").unwrap();
        let getter = run(&engine, "(function() { return this.v * 10; })").unwrap();
        let setter = run(&engine, "(function(x) { this.v = x; })").unwrap();
        let descriptor = PropertyDescriptor {
            value: None,
            getter: Some(getter),
            setter: Some(setter),
            writable: false,
            enumerable: false,
            configurable: true,
        };
        let key = PropertyKey::from("scaled");
        engine.define_property(object, &key, descriptor).unwrap();
        let v = engine.get_property(&mut host, object, &key).unwrap();
        assert_eq!(engine.inspect(v), JsValue::Number(10.0));
        let four = engine.create_number(4.0);
        engine.set_property(&mut host, object, &key, four).unwrap();
        let v = run(&engine, "store.scaled").unwrap();
        assert_eq!(engine.inspect(v), JsValue::Number(40.0));
        assert_eq!(engine.own_property_keys(object).unwrap(), vec!["v"]);
    }

    #[test]
    fn test_read_only_property_rejects_writes() {
        let engine = SandboxEngine::new();
        let object = engine.create_object();
        let seven = engine.create_number(7.0);
        let descriptor = PropertyDescriptor {
            value: Some(seven),
            getter: None,
            setter: None,
            writable: false,
            enumerable: true,
            configurable: false,
        };
        let key = PropertyKey::from("fixed");
        engine.define_property(object, &key, descriptor).unwrap();
        let mut host = RecordingHost::default();
        assert_eq!(
            engine.set_property(&mut host, object, &key, UNDEFINED),
            Err(EngineError::Exception)
        );
        engine.take_exception();
        assert_eq!(engine.delete_property(object, &key), Ok(false));
        assert!(engine.define_property(object, &key, descriptor).is_err());
        engine.take_exception();
    }

    #[test]
    fn test_boxed_primitives_keep_their_value() {
        let engine = SandboxEngine::new();
        let s = engine.create_string("abc");
        let boxed = engine.to_object(s).unwrap();
        assert_eq!(engine.inspect(boxed), JsValue::Object(ObjectClass::Plain));
        assert_eq!(engine.length_of(boxed), Some(3));
        assert_eq!(engine.display(boxed), "abc");
        assert_eq!(engine.to_object(boxed), Ok(boxed));
        assert!(engine.to_object(NULL).is_err());
        engine.take_exception();
    }
}
