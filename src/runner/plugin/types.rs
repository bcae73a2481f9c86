//! Native function records registered through the call bridge.

use std::fmt;
use std::rc::Rc;

use crate::runner::ds::error::JsResult;
use crate::runner::session::Session;

/// What a native callback learns about the call that reached it. Arguments
/// sit in slots `0..num_args` of the callback's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallInfo {
    pub num_args: usize,
    pub is_construct: bool,
    pub magic: i32,
}

/// Signature of a compiled-in native function. `Ok(true)` returns the value
/// on top of the callback's frame, `Ok(false)` returns `undefined`.
pub type NativeFn = fn(session: &mut Session, info: &CallInfo) -> JsResult<bool>;

pub type NativeClosure = Rc<dyn Fn(&mut Session, &CallInfo) -> JsResult<bool>>;

/// Native callback - either a plain function pointer or a shared closure.
#[derive(Clone)]
pub enum NativeCallback {
    /// Direct function pointer.
    Native(NativeFn),

    /// Closure carrying its own state.
    Closure(NativeClosure),
}

impl NativeCallback {
    pub fn call(&self, session: &mut Session, info: &CallInfo) -> JsResult<bool> {
        match self {
            NativeCallback::Native(f) => f(session, info),
            NativeCallback::Closure(f) => f(session, info),
        }
    }
}

impl fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeCallback::Native(_) => write!(f, "Native(fn)"),
            NativeCallback::Closure(_) => write!(f, "Closure(..)"),
        }
    }
}

/// Native function definition.
#[derive(Debug, Clone)]
pub struct NativeFunction {
    /// Name shown to scripts and in error messages.
    pub name: String,

    pub callback: NativeCallback,

    /// Calls with fewer arguments fail before the callback runs.
    pub min_args: usize,

    /// Reject calls made without `new`.
    pub constructor_only: bool,

    /// Free discriminator handed back in [`CallInfo::magic`], letting one
    /// callback serve several functions.
    pub magic: i32,
}

impl NativeFunction {
    pub fn new(name: impl Into<String>, func: NativeFn) -> Self {
        NativeFunction::with_callback(name, NativeCallback::Native(func))
    }

    pub fn from_closure(
        name: impl Into<String>,
        func: impl Fn(&mut Session, &CallInfo) -> JsResult<bool> + 'static,
    ) -> Self {
        NativeFunction::with_callback(name, NativeCallback::Closure(Rc::new(func)))
    }

    fn with_callback(name: impl Into<String>, callback: NativeCallback) -> Self {
        NativeFunction {
            name: name.into(),
            callback,
            min_args: 0,
            constructor_only: false,
            magic: 0,
        }
    }

    /// Set the minimum argument count.
    pub fn with_min_args(mut self, min_args: usize) -> Self {
        self.min_args = min_args;
        self
    }

    pub fn with_magic(mut self, magic: i32) -> Self {
        self.magic = magic;
        self
    }

    /// Only allow the function to be called with `new`.
    pub fn constructor_only(mut self) -> Self {
        self.constructor_only = true;
        self
    }
}
