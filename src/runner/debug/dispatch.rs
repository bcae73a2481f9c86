//! Engine diagnostic events, turned into callback invocations and stepping
//! decisions.

use std::rc::Rc;

use tracing::{debug, warn};

use super::StepDecision;
use crate::engine::{DebugEvent, EventLocation, RawValue};
use crate::runner::ds::error::JsResult;
use crate::runner::session::Session;

const UNKNOWN_SCRIPT: &str = "[unknown]";

impl Session {
    pub(crate) fn dispatch_debug_event(&mut self, event: DebugEvent) {
        match event {
            DebugEvent::SourceCompile {
                script_id,
                filename,
            } => self.script_compiled(script_id, &filename),
            DebugEvent::Breakpoint(location)
            | DebugEvent::StepComplete(location)
            | DebugEvent::DebuggerStatement(location)
            | DebugEvent::AsyncBreak(location) => self.handle_break(location),
            DebugEvent::RuntimeException {
                location,
                exception,
                handle,
            } => {
                self.handle_throw(location, exception, handle);
                if !self.debugger.in_callback && self.debugger.detach_requested {
                    self.finish_detach();
                    return;
                }
                self.handle_break(location);
            }
        }
    }

    /// Indexes a new script and resolves the breakpoints waiting for it.
    pub(crate) fn script_compiled(&mut self, script_id: u32, filename: &str) {
        let engine = Rc::clone(self.engine());
        self.debugger
            .scripts
            .insert(script_id, filename.to_string());
        if let Some(source) = engine.script_source(script_id) {
            self.debugger.sources.insert(filename.to_string(), source);
        }
        for index in self.debugger.breakpoints.pending_for(filename) {
            let entry = match self.debugger.breakpoints.get_mut(index) {
                Some(entry) => entry,
                None => continue,
            };
            match engine.set_breakpoint(
                script_id,
                entry.line.saturating_sub(1),
                entry.column.saturating_sub(1),
            ) {
                Ok(id) => {
                    entry.id = id;
                    debug!(filename, line = entry.line, id, "breakpoint resolved");
                }
                Err(e) => warn!(filename, line = entry.line, "breakpoint rejected: {}", e),
            }
        }
    }

    pub(crate) fn script_filename(&self, script_id: u32) -> String {
        self.debugger
            .scripts
            .get(&script_id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_SCRIPT.to_string())
    }

    /// Runs a debugger callback in its own stack frame, protected. Detach
    /// requests made by the callback are held until it returns.
    fn run_debug_callback<T>(&mut self, f: impl FnOnce(&mut Session) -> JsResult<T>) -> Option<T> {
        let previous_base = self.stack.enter_frame();
        let was_in_callback = self.debugger.in_callback;
        self.debugger.in_callback = true;
        let outcome = self.protect(f);
        self.debugger.in_callback = was_in_callback;
        self.stack.leave_frame(previous_base);
        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("debugger callback failed: {}", e);
                None
            }
        }
    }

    fn handle_break(&mut self, location: EventLocation) {
        let engine = Rc::clone(self.engine());
        if !self.debugger.enabled {
            engine.set_step_type(StepDecision::Continue.into());
            return;
        }
        let callback = match self.debugger.on_break.clone() {
            Some(callback) => callback,
            None => {
                engine.set_step_type(StepDecision::Continue.into());
                return;
            }
        };
        let filename = self.script_filename(location.script_id);
        let decision = self
            .run_debug_callback(|s| {
                s.push_string(&filename);
                s.push_uint(location.line + 1);
                s.push_uint(location.column + 1);
                callback(s)
            })
            .unwrap_or(StepDecision::Continue);
        engine.set_step_type(decision.into());
        if !self.debugger.in_callback && self.debugger.detach_requested {
            self.finish_detach();
        }
    }

    fn handle_throw(&mut self, location: EventLocation, exception: RawValue, handle: u32) {
        let callback = match self.debugger.on_throw.clone() {
            Some(callback) => callback,
            None => return,
        };
        let filename = self.script_filename(location.script_id);
        let backtrace = self.exception_backtrace(exception, handle);
        self.run_debug_callback(|s| {
            s.push_string(&filename);
            s.push_uint(location.line + 1);
            s.push_uint(location.column + 1);
            s.push_string(&backtrace);
            callback(s)
        });
    }

    /// The exception's own `stack` property, or its string form.
    fn exception_backtrace(&self, exception: RawValue, handle: u32) -> String {
        let engine = self.engine();
        let stack = engine
            .object_properties(handle, 0, usize::MAX)
            .ok()
            .and_then(|props| props.into_iter().find(|p| p.name == "stack"))
            .map(|p| p.display);
        match stack {
            Some(stack) => stack,
            None => engine.to_display_string(exception).unwrap_or_default(),
        }
    }
}
