//! Inspection of a paused engine, for use inside the break callback.
//!
//! Each call pushes its answer onto the stack and reports failure as `false`
//! (or `None`) with nothing pushed. Value summaries carry a handle when the
//! value is an object or function, so the client can expand it further, and
//! `null` otherwise.

use std::rc::Rc;

use tracing::warn;

use crate::engine::DiagProperty;
use crate::runner::session::Session;

impl Session {
    fn push_handle(&mut self, handle: Option<u32>) {
        match handle {
            Some(h) => self.push_uint(h),
            None => self.push_null(),
        };
    }

    /// `[filename line column]` for the breakpoint at `index`.
    pub fn debug_breakpoint(&mut self, index: usize) -> bool {
        let entry = match self.breakpoint(index) {
            Some(entry) => entry.clone(),
            None => return false,
        };
        self.push_string(&entry.filename);
        self.push_uint(entry.line);
        self.push_uint(entry.column);
        true
    }

    /// Number of frames on the paused call stack.
    pub fn debug_call_depth(&self) -> usize {
        self.engine().stack_trace().map(|t| t.len()).unwrap_or(0)
    }

    /// `[filename function_name line column]` for the frame at `level`,
    /// innermost first.
    pub fn debug_call(&mut self, level: usize) -> bool {
        let frame = match self.engine().stack_trace() {
            Ok(trace) => match trace.into_iter().nth(level) {
                Some(frame) => frame,
                None => return false,
            },
            Err(e) => {
                warn!(level, "stack trace unavailable: {}", e);
                return false;
            }
        };
        let filename = self.script_filename(frame.script_id);
        self.push_string(&filename);
        self.push_string(&frame.function_name);
        self.push_uint(frame.line + 1);
        self.push_uint(frame.column + 1);
        true
    }

    fn frame_variables(&self, level: usize) -> Option<Vec<DiagProperty>> {
        match self.engine().stack_properties(level) {
            Ok(vars) => Some(vars),
            Err(e) => {
                warn!(level, "frame variables unavailable: {}", e);
                None
            }
        }
    }

    pub fn debug_var_count(&self, level: usize) -> usize {
        self.frame_variables(level).map(|v| v.len()).unwrap_or(0)
    }

    /// `[name type value_summary handle|null]` for variable `index` of the
    /// frame at `level`.
    pub fn debug_var(&mut self, level: usize, index: usize) -> bool {
        let var = match self.frame_variables(level).and_then(|v| v.into_iter().nth(index)) {
            Some(var) => var,
            None => return false,
        };
        self.push_string(&var.name);
        self.push_string(&var.type_name);
        self.push_string(&var.display);
        self.push_handle(var.handle);
        true
    }

    /// `[key value_summary handle|null]` for own property `index` of the
    /// object behind `handle`.
    pub fn debug_property(&mut self, handle: u32, index: usize) -> bool {
        let property = match self.engine().object_properties(handle, index, 1) {
            Ok(props) => match props.into_iter().next() {
                Some(p) => p,
                None => return false,
            },
            Err(e) => {
                warn!(handle, "object properties unavailable: {}", e);
                return false;
            }
        };
        self.push_string(&property.name);
        self.push_string(&property.display);
        self.push_handle(property.handle);
        true
    }

    /// Evaluates `source` in the frame at `level`: `[type value_summary
    /// handle|null]`. Returns whether the evaluation threw, or `None` if it
    /// could not run at all.
    pub fn debug_eval(&mut self, source: &str, level: usize) -> Option<bool> {
        let engine = Rc::clone(self.engine());
        let (result, errored) = match engine.evaluate_in_frame(self, source, level) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(level, "evaluation in frame failed: {}", e);
                let _ = engine.take_exception();
                return None;
            }
        };
        self.push_string(&result.type_name);
        self.push_string(&result.display);
        self.push_handle(result.handle);
        Some(errored)
    }
}
