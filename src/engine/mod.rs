//! The script engine seen from the host side.
//!
//! The host layer never looks inside an engine. Everything it needs is a
//! primitive on the [`Engine`] trait: create and inspect typed values, bump
//! and drop engine references, call functions, fetch the pending exception,
//! compile scripts, drive module records and talk to the diagnostics API.
//!
//! The engine calls back into the host through [`EngineHost`]. Engine methods
//! take `&self` so that a host callback can re-enter the engine (script calls
//! native, native calls script, and so on) without fighting the borrow
//! checker; implementations keep their mutable state behind `RefCell`s.
//!
//! [`sandbox::SandboxEngine`] is the in-process implementation used by the
//! command line runner and the test-suite.

pub mod sandbox;

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::runner::ds::error::ErrorType;
use crate::runner::ds::value::{BufferType, JsValue, PropertyKey};

/// Opaque id of a value living in the engine heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawValue(u32);

impl RawValue {
    pub const fn from_id(id: u32) -> Self {
        RawValue(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Engine-side module record handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

/// Index of a native function record in the host registry. The engine keeps it
/// inside the function object it creates and hands it back on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

/// Cookie identifying a compiled source, chosen by the host.
pub type SourceContext = u32;

/// Runs once when the engine frees an object, receiving its host data.
pub type Finalizer = Box<dyn FnOnce(Option<Rc<dyn Any>>)>;

/// An own property definition. With a getter or setter present the property
/// is an accessor and `value`/`writable` are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PropertyDescriptor {
    pub value: Option<RawValue>,
    pub getter: Option<RawValue>,
    pub setter: Option<RawValue>,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyDescriptor {
    pub fn is_accessor(&self) -> bool {
        self.getter.is_some() || self.setter.is_some()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// A script exception is pending; fetch it with [`Engine::take_exception`].
    #[error("script exception pending")]
    Exception,
    /// Source failed to compile; the syntax error is pending.
    #[error("compile error pending")]
    Compile,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("script execution is disabled")]
    Disabled,
    #[error("debugging is not enabled")]
    NotDebugging,
}

impl EngineError {
    /// True when the failure left an exception for the host to collect.
    pub fn has_pending(&self) -> bool {
        matches!(self, EngineError::Exception | EngineError::Compile)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// What the debugger wants the engine to do once a break returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    Continue,
    StepIn,
    StepOut,
    StepOver,
}

/// A position inside a compiled script. Lines and columns are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLocation {
    pub script_id: u32,
    pub line: u32,
    pub column: u32,
}

/// Diagnostic events raised while debugging is enabled.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    SourceCompile { script_id: u32, filename: String },
    Breakpoint(EventLocation),
    StepComplete(EventLocation),
    DebuggerStatement(EventLocation),
    AsyncBreak(EventLocation),
    /// An exception nothing in script will catch. `handle` addresses the
    /// exception object through [`Engine::object_properties`].
    RuntimeException {
        location: EventLocation,
        exception: RawValue,
        handle: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptInfo {
    pub script_id: u32,
    pub filename: String,
    pub line_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagBreakpoint {
    pub id: u32,
    pub script_id: u32,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagFrame {
    pub index: usize,
    pub script_id: u32,
    pub line: u32,
    pub column: u32,
    pub function_name: String,
    pub function_handle: u32,
}

/// One entry of a diagnostics property listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagProperty {
    pub name: String,
    pub type_name: String,
    pub display: String,
    /// Set for object-like values, which can be expanded further.
    pub handle: Option<u32>,
}

/// An engine-to-native call.
#[derive(Debug)]
pub struct NativeCall<'a> {
    pub function: FunctionId,
    pub callee: RawValue,
    pub this: RawValue,
    pub args: &'a [RawValue],
    pub is_construct: bool,
}

/// Callbacks from the engine into the embedding host.
pub trait EngineHost {
    /// Runs a host function. `Err` carries the thrown value.
    fn call_native(&mut self, call: NativeCall<'_>) -> Result<RawValue, RawValue>;

    /// A static `import` inside `importer` needs a module record.
    fn fetch_imported_module(&mut self, importer: ModuleId, specifier: &str) -> ModuleId;

    /// A dynamic `import()` needs a module record.
    fn fetch_dynamic_import(&mut self, specifier: &str) -> ModuleId;

    /// A root module and its whole dependency graph are parsed (or failed).
    fn notify_module_ready(&mut self, module: ModuleId, exception: Option<RawValue>);

    /// A diagnostics event. Stepping decisions go back through
    /// [`Engine::set_step_type`] before returning.
    fn debug_event(&mut self, event: DebugEvent);
}

/// The primitive surface of a script engine.
pub trait Engine {
    fn name(&self) -> &str;

    // ── Values ──

    fn undefined(&self) -> RawValue;
    fn null(&self) -> RawValue;
    fn global_object(&self) -> RawValue;
    fn create_boolean(&self, value: bool) -> RawValue;
    fn create_number(&self, value: f64) -> RawValue;
    fn create_string(&self, value: &str) -> RawValue;
    fn create_symbol(&self, description: &str) -> RawValue;
    fn create_object(&self) -> RawValue;
    /// An object without a prototype.
    fn create_bare_object(&self) -> RawValue;
    fn create_array(&self) -> RawValue;
    fn create_buffer(&self, kind: BufferType, length: usize) -> RawValue;
    fn create_error(&self, kind: ErrorType, message: &str) -> RawValue;
    fn create_host_function(&self, name: &str, function: FunctionId) -> RawValue;

    fn inspect(&self, value: RawValue) -> JsValue;
    fn to_boolean(&self, value: RawValue) -> bool;
    fn to_number(&self, value: RawValue) -> EngineResult<f64>;
    fn to_display_string(&self, value: RawValue) -> EngineResult<String>;
    fn strict_equals(&self, a: RawValue, b: RawValue) -> bool;
    /// Wraps a primitive in an object; objects come back unchanged.
    fn to_object(&self, value: RawValue) -> EngineResult<RawValue>;
    /// Length of a string, array or buffer.
    fn length_of(&self, value: RawValue) -> Option<usize>;
    fn buffer_bytes(&self, value: RawValue) -> Option<Vec<u8>>;
    fn write_buffer(&self, value: RawValue, offset: usize, data: &[u8]) -> EngineResult<()>;
    fn parse_json(&self, text: &str) -> EngineResult<RawValue>;
    /// `None` for values JSON cannot represent, such as `undefined`.
    fn stringify_json(&self, value: RawValue) -> EngineResult<Option<String>>;

    // ── Lifetime ──

    fn add_ref(&self, value: RawValue) -> u32;
    fn release(&self, value: RawValue) -> u32;
    fn ref_count(&self, value: RawValue) -> u32;
    /// Reclaims unreachable values and returns how many were freed.
    fn collect_garbage(&self) -> usize;

    // ── Properties ──

    /// Reads a property. Getters run, so the host must be at hand.
    fn get_property(
        &self,
        host: &mut dyn EngineHost,
        object: RawValue,
        key: &PropertyKey,
    ) -> EngineResult<RawValue>;
    fn set_property(
        &self,
        host: &mut dyn EngineHost,
        object: RawValue,
        key: &PropertyKey,
        value: RawValue,
    ) -> EngineResult<()>;
    fn define_property(
        &self,
        object: RawValue,
        key: &PropertyKey,
        descriptor: PropertyDescriptor,
    ) -> EngineResult<()>;
    fn has_property(&self, object: RawValue, key: &PropertyKey) -> EngineResult<bool>;
    fn delete_property(&self, object: RawValue, key: &PropertyKey) -> EngineResult<bool>;
    fn own_property_keys(&self, object: RawValue) -> EngineResult<Vec<String>>;
    fn get_prototype(&self, object: RawValue) -> EngineResult<RawValue>;
    fn set_prototype(&self, object: RawValue, prototype: RawValue) -> EngineResult<()>;

    // ── Host data ──

    fn set_host_data(&self, object: RawValue, data: Option<Rc<dyn Any>>) -> EngineResult<()>;
    fn host_data(&self, object: RawValue) -> Option<Rc<dyn Any>>;
    /// Replaces the object's finalizer. It runs when the object is collected
    /// or when the context is reset.
    fn set_finalizer(&self, object: RawValue, finalizer: Option<Finalizer>) -> EngineResult<()>;

    // ── Invocation ──

    fn call_function(
        &self,
        host: &mut dyn EngineHost,
        function: RawValue,
        this: RawValue,
        args: &[RawValue],
    ) -> EngineResult<RawValue>;
    fn construct(
        &self,
        host: &mut dyn EngineHost,
        constructor: RawValue,
        args: &[RawValue],
    ) -> EngineResult<RawValue>;

    fn has_exception(&self) -> bool;
    fn take_exception(&self) -> Option<RawValue>;
    fn set_exception(&self, value: RawValue);

    // ── Scripts ──

    /// Compiles a script into a callable function without running it.
    fn compile(
        &self,
        host: &mut dyn EngineHost,
        source: &str,
        filename: &str,
        context: SourceContext,
    ) -> EngineResult<RawValue>;
    /// Compiles and runs a script, returning its completion value.
    fn run(
        &self,
        host: &mut dyn EngineHost,
        source: &str,
        filename: &str,
        context: SourceContext,
    ) -> EngineResult<RawValue>;

    // ── Modules ──

    fn create_module(&self, parent: Option<ModuleId>, specifier: &str) -> ModuleId;
    fn parse_module(
        &self,
        host: &mut dyn EngineHost,
        module: ModuleId,
        source: &str,
        filename: &str,
        context: SourceContext,
    ) -> EngineResult<()>;
    fn evaluate_module(&self, host: &mut dyn EngineHost, module: ModuleId) -> EngineResult<RawValue>;
    fn module_namespace(&self, module: ModuleId) -> EngineResult<RawValue>;
    fn set_module_exception(&self, module: ModuleId, exception: RawValue);
    fn module_exception(&self, module: ModuleId) -> Option<RawValue>;

    // ── Lifecycle ──

    /// Throws the whole context away and starts from a fresh one.
    fn reset(&self);
    fn set_disabled(&self, disabled: bool);
    fn is_disabled(&self) -> bool;

    // ── Diagnostics ──

    fn start_debugging(&self) -> EngineResult<()>;
    fn stop_debugging(&self);
    fn is_debugging(&self) -> bool;
    fn set_break_on_exception(&self, uncaught: bool);
    fn scripts(&self) -> Vec<ScriptInfo>;
    fn script_source(&self, script_id: u32) -> Option<String>;
    fn set_breakpoint(&self, script_id: u32, line: u32, column: u32) -> EngineResult<u32>;
    fn remove_breakpoint(&self, id: u32) -> EngineResult<()>;
    fn breakpoints(&self) -> Vec<DiagBreakpoint>;
    fn request_async_break(&self);
    fn step_type(&self) -> StepType;
    fn set_step_type(&self, step: StepType);
    /// Innermost frame first.
    fn stack_trace(&self) -> EngineResult<Vec<DiagFrame>>;
    fn stack_properties(&self, frame: usize) -> EngineResult<Vec<DiagProperty>>;
    fn object_properties(&self, handle: u32, from: usize, count: usize) -> EngineResult<Vec<DiagProperty>>;
    /// Evaluates `source` inside `frame`; the flag is set when it threw.
    fn evaluate_in_frame(
        &self,
        host: &mut dyn EngineHost,
        source: &str,
        frame: usize,
    ) -> EngineResult<(DiagProperty, bool)>;
}
