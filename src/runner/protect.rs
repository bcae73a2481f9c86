//! Protected regions.
//!
//! Entering a protected region pushes a [`CatchFrame`] recording where the
//! stack should be cut back to. If the region fails, the frame is popped, the
//! stack is unwound to the saved length and base (dropping every handle above
//! it), the receiver and callee are put back and the error value is pushed.
//! Frames nest strictly: the innermost region always handles its own failure.

use std::process;
use std::rc::Rc;

use tracing::{error, trace};

use crate::runner::ds::error::{ErrorKind, ErrorType, Exception, JsResult, StackError};
use crate::runner::ds::handle::{Handle, Owned};
use crate::runner::session::Session;

/// A saved unwind target.
pub(crate) struct CatchFrame {
    stack_len: usize,
    base: usize,
    this: Handle,
    callee: Handle,
}

#[derive(Default)]
pub struct CatchStack {
    frames: Vec<CatchFrame>,
}

impl CatchStack {
    pub fn with_capacity(capacity: usize) -> Self {
        CatchStack {
            frames: Vec::with_capacity(capacity),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn push(&mut self, frame: CatchFrame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<CatchFrame> {
        self.frames.pop()
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }
}

impl Session {
    /// Number of protected regions currently open.
    pub fn catch_depth(&self) -> usize {
        self.catch_stack.depth()
    }

    /// Runs `f` in a protected region.
    ///
    /// On failure the stack is back at the depth it had on entry with the
    /// error value pushed on top, and the exception is handed back as well.
    /// Slots below the entry depth that `f` popped come back as `undefined`,
    /// so the failed region always leaves exactly one slot above that depth.
    pub fn protect<T>(&mut self, f: impl FnOnce(&mut Session) -> JsResult<T>) -> JsResult<T> {
        let len = self.stack.len();
        self.protect_at(len, f)
    }

    /// Like [`Session::protect`], but failures unwind to an absolute stack
    /// length below the current top, so operands consumed by `f` go too.
    pub(crate) fn protect_at<T>(
        &mut self,
        stack_len: usize,
        f: impl FnOnce(&mut Session) -> JsResult<T>,
    ) -> JsResult<T> {
        self.catch_stack.push(CatchFrame {
            stack_len,
            base: self.stack.base(),
            this: self.this.clone(),
            callee: self.callee.clone(),
        });
        let depth = self.catch_stack.depth();
        let outcome = f(self);
        // Anything nested inside `f` has already popped its own frame.
        debug_assert_eq!(self.catch_stack.depth(), depth);
        let frame = self.catch_stack.pop();
        match outcome {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Some(frame) = frame {
                    trace!(
                        kind = %e.kind(),
                        stack_len = frame.stack_len,
                        "unwinding protected region: {}",
                        e
                    );
                    self.stack.unwind_to(frame.stack_len, frame.base);
                    self.this = frame.this;
                    self.callee = frame.callee;
                }
                self.stack.push(Handle::Owned(e.value().clone()));
                Err(e)
            }
        }
    }

    fn operand_floor(&self, count: usize) -> Result<usize, Exception> {
        let top = self.stack.top();
        if count > top {
            return Err(self.stack_failure(StackError::Underflow { count, top }));
        }
        Ok(self.stack.len() - count)
    }

    fn try_with(&mut self, operands: usize, f: impl FnOnce(&mut Session) -> JsResult<()>) -> bool {
        let floor = match self.operand_floor(operands) {
            Ok(floor) => floor,
            Err(e) => {
                self.stack.push(Handle::Owned(e.value().clone()));
                return false;
            }
        };
        self.protect_at(floor, f).is_ok()
    }

    /// `[f a1..an] -> [ret]` or `[error]`.
    pub fn try_call(&mut self, nargs: usize) -> bool {
        self.try_with(nargs + 1, |s| s.call(nargs))
    }

    /// `[f this a1..an] -> [ret]` or `[error]`.
    pub fn try_call_method(&mut self, nargs: usize) -> bool {
        self.try_with(nargs + 2, |s| s.call_method(nargs))
    }

    /// `[ctor a1..an] -> [obj]` or `[error]`.
    pub fn try_construct(&mut self, nargs: usize) -> bool {
        self.try_with(nargs + 1, |s| s.construct(nargs))
    }

    /// `[source] -> [function]` or `[error]`.
    pub fn try_compile(&mut self, filename: &str) -> bool {
        self.try_with(1, |s| s.compile(filename).map(|_| ()))
    }

    /// `[source] -> [namespace]` or `[error]`.
    pub fn try_eval_module(&mut self, filename: &str) -> bool {
        self.try_with(1, |s| s.eval_module(filename))
    }

    /// `[json] -> [value]` or `[error]`.
    pub fn try_parse(&mut self) -> bool {
        self.try_with(1, |s| s.parse(-1))
    }

    /// Runs a native callback as if the engine had called it, with the top
    /// `nargs` values as its arguments: `[a1..an] -> [ret]` or `[error]`.
    pub fn try_native(
        &mut self,
        nargs: usize,
        f: impl FnOnce(&mut Session) -> JsResult<bool>,
    ) -> bool {
        self.try_with(nargs, |s| {
            let mut args = Vec::with_capacity(nargs);
            for _ in 0..nargs {
                if let Some(handle) = s.stack.pop_handle() {
                    args.push(handle);
                }
            }
            let previous_base = s.stack.enter_frame();
            for handle in args.into_iter().rev() {
                s.stack.push(handle);
            }
            let returned = f(s)?;
            let engine = Rc::clone(s.engine());
            let value = match s.stack.get(-1) {
                Ok(raw) if returned => raw,
                _ => engine.undefined(),
            };
            let value = Owned::new(&engine, value);
            s.stack.leave_frame(previous_base);
            s.stack.push(Handle::Owned(value));
            Ok(())
        })
    }

    /// Pops the top value and throws it.
    ///
    /// ```
    /// # use std::rc::Rc;
    /// # use jshost::engine::sandbox::SandboxEngine;
    /// # use jshost::runner::session::Session;
    /// let mut session = Session::new(Rc::new(SandboxEngine::new()));
    /// session.push_string("boom");
    /// let ok = session.try_native(0, |s| {
    ///     s.push_string("nope");
    ///     s.throw()
    /// });
    /// assert!(!ok);
    /// assert_eq!(session.get_string(-1).as_deref(), Some("nope"));
    /// ```
    pub fn throw<T>(&mut self) -> JsResult<T> {
        let raw = self.slot(-1)?;
        let e = self.wrap(raw, ErrorKind::Host);
        self.pop(1)?;
        Err(e)
    }

    /// Throws a new error object of the given type.
    pub fn error<T>(&self, error_type: ErrorType, message: &str) -> JsResult<T> {
        Err(self.fail(ErrorKind::Host, error_type, message))
    }

    /// Runs host code that has no way to handle a script error. An error
    /// reaching this point is fatal: it is logged and the process aborts.
    pub fn unguarded<T>(&mut self, f: impl FnOnce(&mut Session) -> JsResult<T>) -> T {
        match f(self) {
            Ok(value) => value,
            Err(e) => {
                error!(
                    session = %self.id(),
                    kind = %e.kind(),
                    "uncaught error outside a protected region: {}",
                    e
                );
                process::abort()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sandbox::SandboxEngine;

    fn session() -> Session {
        Session::new(Rc::new(SandboxEngine::new()))
    }

    #[test]
    fn test_protect_restores_depth() {
        let mut s = session();
        s.push_int(1);
        let result: JsResult<()> = s.protect(|s| {
            s.push_int(2);
            s.push_int(3);
            s.error(ErrorType::RangeError, "too far")
        });
        let e = result.err().map(|e| e.kind());
        assert_eq!(e, Some(ErrorKind::Host));
        assert_eq!(s.get_top(), 2);
        assert!(s.is_error(-1));
        assert_eq!(s.catch_depth(), 0);
    }

    #[test]
    fn test_nested_regions_unwind_innermost_first() {
        let mut s = session();
        let outer: JsResult<()> = s.protect(|s| {
            s.push_int(1);
            let inner: JsResult<()> = s.protect(|s| {
                s.push_int(2);
                s.error(ErrorType::Error, "inner")
            });
            assert!(inner.is_err());
            assert_eq!(s.get_top(), 2);
            assert_eq!(s.catch_depth(), 1);
            Ok(())
        });
        assert!(outer.is_ok());
        assert_eq!(s.get_top(), 2);
    }

    #[test]
    fn test_try_with_too_few_operands() {
        let mut s = session();
        assert!(!s.try_call(2));
        assert_eq!(s.get_top(), 1);
        assert!(s.is_error(-1));
    }
}
