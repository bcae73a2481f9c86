//! Debugging state of the sandbox engine: the script registry, breakpoints,
//! stepping and exception reporting.

use super::ast::Pos;
use super::SandboxEngine;
use crate::engine::{
    DebugEvent, DiagBreakpoint, DiagFrame, DiagProperty, EngineError, EngineHost, EngineResult,
    EventLocation, RawValue, ScriptInfo, StepType,
};
use crate::runner::ds::value::{JsValue, ObjectClass};

pub struct ScriptRecord {
    pub id: u32,
    pub filename: String,
    pub source: String,
}

impl ScriptRecord {
    pub fn line_count(&self) -> u32 {
        self.source.lines().count().max(1) as u32
    }
}

pub struct DiagState {
    pub debugging: bool,
    pub break_on_uncaught: bool,
    pub scripts: Vec<ScriptRecord>,
    pub breakpoints: Vec<DiagBreakpoint>,
    next_breakpoint: u32,
    pub async_break: bool,
    /// Active step request and the frame depth it was issued at.
    stepping: Option<(StepType, usize)>,
    pub step_type: StepType,
    last_reported: Option<RawValue>,
    in_event: bool,
}

impl Default for DiagState {
    fn default() -> Self {
        DiagState {
            debugging: false,
            break_on_uncaught: false,
            scripts: vec![],
            breakpoints: vec![],
            next_breakpoint: 1,
            async_break: false,
            stepping: None,
            step_type: StepType::Continue,
            last_reported: None,
            in_event: false,
        }
    }
}

impl DiagState {
    pub fn stop(&mut self) {
        self.debugging = false;
        self.breakpoints.clear();
        self.async_break = false;
        self.stepping = None;
        self.step_type = StepType::Continue;
    }

    /// Forgets the last reported exception, at the start of a top-level entry.
    pub fn new_entry(&mut self) {
        self.last_reported = None;
    }

    pub fn add_breakpoint(&mut self, script_id: u32, line: u32, column: u32) -> EngineResult<u32> {
        if !self.debugging {
            return Err(EngineError::NotDebugging);
        }
        let script = self
            .scripts
            .iter()
            .find(|s| s.id == script_id)
            .ok_or_else(|| EngineError::InvalidArgument(format!("no script with id {}", script_id)))?;
        if line >= script.line_count() {
            return Err(EngineError::InvalidArgument(format!(
                "line {} is outside script {}",
                line, script_id
            )));
        }
        let id = self.next_breakpoint;
        self.next_breakpoint += 1;
        self.breakpoints.push(DiagBreakpoint {
            id,
            script_id,
            line,
            column,
        });
        Ok(id)
    }

    pub fn remove_breakpoint(&mut self, id: u32) -> EngineResult<()> {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|b| b.id != id);
        if before == self.breakpoints.len() {
            return Err(EngineError::InvalidArgument(format!("no breakpoint with id {}", id)));
        }
        Ok(())
    }

    pub fn script_infos(&self) -> Vec<ScriptInfo> {
        self.scripts
            .iter()
            .map(|s| ScriptInfo {
                script_id: s.id,
                filename: s.filename.clone(),
                line_count: s.line_count(),
            })
            .collect()
    }
}

impl SandboxEngine {
    /// Records a freshly compiled source and announces it to a debugger.
    pub(super) fn register_script(&self, host: &mut dyn EngineHost, filename: &str, source: &str) -> u32 {
        let (id, debugging) = {
            let mut diag = self.diag.borrow_mut();
            let id = diag.scripts.len() as u32 + 1;
            diag.scripts.push(ScriptRecord {
                id,
                filename: filename.to_string(),
                source: source.to_string(),
            });
            (id, diag.debugging)
        };
        if debugging {
            host.debug_event(DebugEvent::SourceCompile {
                script_id: id,
                filename: filename.to_string(),
            });
        }
        id
    }

    pub(super) fn script_filename(&self, script_id: u32) -> String {
        self.diag
            .borrow()
            .scripts
            .iter()
            .find(|s| s.id == script_id)
            .map(|s| s.filename.clone())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    pub(super) fn before_statement(&self, host: &mut dyn EngineHost, pos: Pos, script_id: u32) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.pos = pos;
        }
        let depth = self.frames.borrow().len();
        let event = {
            let mut diag = self.diag.borrow_mut();
            if !diag.debugging || diag.in_event {
                return;
            }
            let location = EventLocation {
                script_id,
                line: pos.line,
                column: pos.column,
            };
            let stepped = match diag.stepping {
                Some((StepType::StepIn, _)) => true,
                Some((StepType::StepOver, from)) => depth <= from,
                Some((StepType::StepOut, from)) => depth < from,
                _ => false,
            };
            if diag.async_break {
                diag.async_break = false;
                Some(DebugEvent::AsyncBreak(location))
            } else if stepped {
                Some(DebugEvent::StepComplete(location))
            } else if diag
                .breakpoints
                .iter()
                .any(|b| b.script_id == script_id && b.line == pos.line)
            {
                Some(DebugEvent::Breakpoint(location))
            } else {
                None
            }
        };
        if let Some(event) = event {
            self.dispatch_break(host, event);
        }
    }

    pub(super) fn debugger_statement(&self, host: &mut dyn EngineHost, pos: Pos, script_id: u32) {
        {
            let diag = self.diag.borrow();
            if !diag.debugging || diag.in_event {
                return;
            }
        }
        let location = EventLocation {
            script_id,
            line: pos.line,
            column: pos.column,
        };
        self.dispatch_break(host, DebugEvent::DebuggerStatement(location));
    }

    /// Reports a throw to an attached debugger, once per exception value.
    pub(super) fn report_throw(&self, host: &mut dyn EngineHost, value: RawValue) {
        let location = match self.frames.borrow().last() {
            Some(f) => EventLocation {
                script_id: f.script_id,
                line: f.pos.line,
                column: f.pos.column,
            },
            None => return,
        };
        {
            let mut diag = self.diag.borrow_mut();
            if !diag.debugging
                || !diag.break_on_uncaught
                || diag.in_event
                || diag.last_reported == Some(value)
            {
                return;
            }
            diag.last_reported = Some(value);
        }
        self.dispatch_break(
            host,
            DebugEvent::RuntimeException {
                location,
                exception: value,
                handle: value.id(),
            },
        );
    }

    fn dispatch_break(&self, host: &mut dyn EngineHost, event: DebugEvent) {
        {
            let mut diag = self.diag.borrow_mut();
            diag.in_event = true;
            diag.step_type = StepType::Continue;
        }
        host.debug_event(event);
        let depth = self.frames.borrow().len();
        let mut diag = self.diag.borrow_mut();
        diag.in_event = false;
        diag.stepping = match diag.step_type {
            StepType::Continue => None,
            step if diag.debugging => Some((step, depth)),
            _ => None,
        };
    }

    pub(super) fn describe(&self, name: &str, value: RawValue) -> DiagProperty {
        let kind = self.inspect_value(value);
        let display = match &kind {
            JsValue::String(s) => s.clone(),
            JsValue::Object(ObjectClass::Plain) => "{...}".to_string(),
            JsValue::Object(ObjectClass::Array) => {
                format!("Array[{}]", self.array_length(value))
            }
            _ => self.display(value),
        };
        DiagProperty {
            name: name.to_string(),
            type_name: kind.type_name().to_string(),
            display,
            handle: if kind.is_object_like() {
                Some(value.id())
            } else {
                None
            },
        }
    }

    pub(super) fn frame_trace(&self) -> Vec<DiagFrame> {
        self.frames
            .borrow()
            .iter()
            .rev()
            .enumerate()
            .map(|(index, f)| DiagFrame {
                index,
                script_id: f.script_id,
                line: f.pos.line,
                column: f.pos.column,
                function_name: f.function_name.clone(),
                function_handle: f.function.id(),
            })
            .collect()
    }

    /// Locals of a frame (innermost first) followed by `this`.
    pub(super) fn frame_locals(&self, frame: usize) -> EngineResult<Vec<DiagProperty>> {
        let (vars, this) = {
            let frames = self.frames.borrow();
            let n = frames.len();
            if frame >= n {
                return Err(EngineError::InvalidArgument(format!("no frame {}", frame)));
            }
            let f = &frames[n - 1 - frame];
            let mut vars: Vec<(String, RawValue)> = f
                .scope
                .borrow()
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            vars.sort_by(|a, b| a.0.cmp(&b.0));
            (vars, f.this)
        };
        let mut properties: Vec<DiagProperty> = vars
            .into_iter()
            .map(|(name, value)| self.describe(&name, value))
            .collect();
        properties.push(self.describe("this", this));
        Ok(properties)
    }

    pub(super) fn handle_properties(
        &self,
        handle: u32,
        from: usize,
        count: usize,
    ) -> EngineResult<Vec<DiagProperty>> {
        let target = RawValue::from_id(handle);
        let entries: Vec<(String, RawValue)> = {
            let heap = self.heap.borrow();
            let object = heap
                .object(target)
                .ok_or_else(|| EngineError::InvalidArgument(format!("no object with handle {}", handle)))?;
            object
                .entries()
                .map(|(k, v)| (k.to_string(), v))
                .skip(from)
                .take(count)
                .collect()
        };
        Ok(entries
            .into_iter()
            .map(|(name, value)| self.describe(&name, value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_script() -> DiagState {
        let mut state = DiagState::default();
        state.debugging = true;
        state.scripts.push(ScriptRecord {
            id: 1,
            filename: "a.js".to_string(),
            source: "let a = 1;\nlet b = 2;\n".to_string(),
        });
        state
    }

    #[test]
    fn test_breakpoint_ids_increase() {
        let mut state = state_with_script();
        assert_eq!(state.add_breakpoint(1, 0, 0), Ok(1));
        assert_eq!(state.add_breakpoint(1, 1, 0), Ok(2));
        assert!(state.remove_breakpoint(1).is_ok());
        assert!(state.remove_breakpoint(1).is_err());
        assert_eq!(state.breakpoints.len(), 1);
    }

    #[test]
    fn test_breakpoint_requires_debugging_and_valid_line() {
        let mut state = state_with_script();
        assert!(state.add_breakpoint(1, 7, 0).is_err());
        assert!(state.add_breakpoint(9, 0, 0).is_err());
        state.stop();
        assert_eq!(state.add_breakpoint(1, 0, 0), Err(EngineError::NotDebugging));
    }
}
