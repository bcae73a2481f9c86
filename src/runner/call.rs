//! The call bridge: native functions made callable from script, script
//! functions called from native code, and the [`EngineHost`] side of the
//! engine boundary.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::engine::{DebugEvent, EngineHost, ModuleId, NativeCall, RawValue, SourceContext};
use crate::runner::ds::error::{ErrorKind, ErrorType, JsResult, StackError};
use crate::runner::ds::handle::{Handle, Owned};
use crate::runner::plugin::types::{CallInfo, NativeFunction};
use crate::runner::session::Session;

enum Invoke {
    Call,
    Method,
    Construct,
}

impl Session {
    /// Registers a native function and pushes the script-visible function
    /// value for it.
    pub fn register_function(&mut self, function: NativeFunction) -> usize {
        let name = function.name.clone();
        let id = self.functions.register(function);
        let raw = self.engine().create_host_function(&name, id);
        debug!(
            name = %name,
            id = id.0,
            total = self.functions.len(),
            "registered native function"
        );
        self.push_owned(raw)
    }

    /// Registers a native function under its own name on the global object.
    pub fn register_global(&mut self, function: NativeFunction) -> JsResult<()> {
        let name = function.name.clone();
        self.register_function(function);
        self.put_global_string(&name)
    }

    /// `[f a1..an] -> [ret]`
    pub fn call(&mut self, nargs: usize) -> JsResult<()> {
        self.invoke(Invoke::Call, nargs)
    }

    /// `[f this a1..an] -> [ret]`
    pub fn call_method(&mut self, nargs: usize) -> JsResult<()> {
        self.invoke(Invoke::Method, nargs)
    }

    /// `[ctor a1..an] -> [obj]`
    pub fn construct(&mut self, nargs: usize) -> JsResult<()> {
        self.invoke(Invoke::Construct, nargs)
    }

    fn invoke(&mut self, mode: Invoke, nargs: usize) -> JsResult<()> {
        let window = match mode {
            Invoke::Method => nargs + 2,
            _ => nargs + 1,
        };
        let top = self.get_top();
        if window > top {
            return Err(self.stack_failure(StackError::Underflow { count: window, top }));
        }
        let function = self.slot(-(window as i32))?;
        let this = match mode {
            Invoke::Method => self.slot(-(nargs as i32) - 1)?,
            _ => self.engine().undefined(),
        };
        let mut args = Vec::with_capacity(nargs);
        for i in 0..nargs {
            args.push(self.slot(i as i32 - nargs as i32)?);
        }

        let engine = Rc::clone(self.engine());
        let outcome = match mode {
            Invoke::Construct => engine.construct(self, function, &args),
            _ => engine.call_function(self, function, this, &args),
        };
        let outcome = outcome
            .map(|raw| Owned::new(&engine, raw))
            .map_err(|e| self.engine_failure(e));
        self.pop(window)?;
        self.stack.push(Handle::Owned(outcome?));
        Ok(())
    }

    /// `[source] -> [function]`; returns the context id given to the source.
    pub fn compile(&mut self, filename: &str) -> JsResult<SourceContext> {
        let source = self.require_string(-1)?;
        let context = self.next_source_context();
        let engine = Rc::clone(self.engine());
        let outcome = engine
            .compile(self, &source, filename, context)
            .map(|raw| Owned::new(&engine, raw))
            .map_err(|e| self.engine_failure(e));
        self.pop(1)?;
        self.stack.push(Handle::Owned(outcome?));
        Ok(context)
    }

    /// Runs a script and pushes its completion value.
    pub fn push_eval(&mut self, source: &str) -> JsResult<()> {
        self.eval_script(source, "eval")
    }

    /// Runs a script under `filename` and pushes its completion value.
    pub fn eval_script(&mut self, source: &str, filename: &str) -> JsResult<()> {
        let context = self.next_source_context();
        let engine = Rc::clone(self.engine());
        let raw = engine
            .run(self, source, filename, context)
            .map_err(|e| self.engine_failure(e))?;
        self.push_owned(raw);
        Ok(())
    }

    fn dispatch(&mut self, function: &NativeFunction, info: &CallInfo) -> JsResult<bool> {
        if function.constructor_only && !info.is_construct {
            return Err(self.fail(
                ErrorKind::ConstructorRequired,
                ErrorType::TypeError,
                &format!("{} must be called with 'new'", function.name),
            ));
        }
        if info.num_args < function.min_args {
            return Err(self.fail(
                ErrorKind::Arity,
                ErrorType::TypeError,
                &format!(
                    "{} expects at least {} argument(s), got {}",
                    function.name, function.min_args, info.num_args
                ),
            ));
        }
        function.callback.call(self, info)
    }
}

impl EngineHost for Session {
    fn call_native(&mut self, call: NativeCall<'_>) -> Result<RawValue, RawValue> {
        let function = match self.functions.get(call.function) {
            Some(function) => function,
            None => {
                let message = format!("no native function with id {}", call.function.0);
                return Err(self.fail(ErrorKind::Host, ErrorType::TypeError, &message).raw());
            }
        };
        let info = CallInfo {
            num_args: call.args.len(),
            is_construct: call.is_construct,
            magic: function.magic,
        };
        trace!(name = %function.name, args = info.num_args, "native call");

        let previous_base = self.stack.enter_frame();
        for arg in call.args {
            self.stack.push(Handle::borrowed(*arg));
        }
        let saved_this = std::mem::replace(&mut self.this, Handle::borrowed(call.this));
        let saved_callee = std::mem::replace(&mut self.callee, Handle::borrowed(call.callee));

        let outcome = self.protect(|s| s.dispatch(&function, &info));
        let engine = Rc::clone(self.engine());
        let result = match outcome {
            Ok(true) => Ok(Owned::new(
                &engine,
                self.stack.get(-1).unwrap_or_else(|_| engine.undefined()),
            )),
            Ok(false) => Ok(Owned::new(&engine, engine.undefined())),
            Err(e) => {
                self.native_failure.set(Some((e.raw(), e.kind())));
                Err(e.value().clone())
            }
        };

        self.stack.leave_frame(previous_base);
        self.this = saved_this;
        self.callee = saved_callee;
        match result {
            Ok(value) => Ok(value.raw()),
            Err(thrown) => Err(thrown.raw()),
        }
    }

    fn fetch_imported_module(&mut self, importer: ModuleId, specifier: &str) -> ModuleId {
        self.fetch_module(Some(importer), specifier)
    }

    fn fetch_dynamic_import(&mut self, specifier: &str) -> ModuleId {
        self.fetch_module(None, specifier)
    }

    fn notify_module_ready(&mut self, module: ModuleId, exception: Option<RawValue>) {
        self.module_ready(module, exception);
    }

    fn debug_event(&mut self, event: DebugEvent) {
        self.dispatch_debug_event(event);
    }
}
