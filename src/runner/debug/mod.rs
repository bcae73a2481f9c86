//! The debugger bridge.
//!
//! Keeps the client's breakpoint table and a script index fed by the engine's
//! "script compiled" events, and answers the engine's break events by calling
//! back into the application. The break callback sees `[filename line column]`
//! in its own frame and returns a [`StepDecision`]; the throw callback sees
//! `[filename line column backtrace]`. While a callback runs, the inspection
//! calls in [`inspect`] can walk the paused engine's frames and objects.
//!
//! Everything here is synchronous: a break blocks script execution until the
//! callback returns.

pub mod breakpoints;
mod dispatch;
pub mod inspect;
pub mod transport;

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info};

use crate::engine::StepType;
use crate::runner::ds::error::JsResult;
use crate::runner::session::Session;

use self::breakpoints::{BreakpointEntry, BreakpointTable};
use self::transport::{DebugChannel, Transport, TransportError};

/// What the break callback wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    Continue,
    StepIn,
    StepOut,
    StepOver,
}

impl From<StepDecision> for StepType {
    fn from(decision: StepDecision) -> Self {
        match decision {
            StepDecision::Continue => StepType::Continue,
            StepDecision::StepIn => StepType::StepIn,
            StepDecision::StepOut => StepType::StepOut,
            StepDecision::StepOver => StepType::StepOver,
        }
    }
}

pub type BreakCallback = Rc<dyn Fn(&mut Session) -> JsResult<StepDecision>>;
pub type ThrowCallback = Rc<dyn Fn(&mut Session) -> JsResult<()>>;

#[derive(Default)]
pub struct DebugBridge {
    enabled: bool,
    breakpoints: BreakpointTable,
    /// Script id to filename.
    scripts: HashMap<u32, String>,
    /// Filename to source text.
    sources: HashMap<String, String>,
    on_break: Option<BreakCallback>,
    on_throw: Option<ThrowCallback>,
    in_callback: bool,
    detach_requested: bool,
    channel: Option<DebugChannel>,
}

impl DebugBridge {
    /// Forgets everything tied to the current engine context.
    pub(crate) fn reset(&mut self) {
        self.breakpoints.clear();
        self.scripts.clear();
        self.sources.clear();
        self.in_callback = false;
        self.detach_requested = false;
    }
}

impl Session {
    /// Turns debugging on and installs the break and throw callbacks.
    /// Scripts compiled before this call are indexed right away.
    pub fn debug_init(
        &mut self,
        on_break: impl Fn(&mut Session) -> JsResult<StepDecision> + 'static,
        on_throw: impl Fn(&mut Session) -> JsResult<()> + 'static,
    ) -> JsResult<()> {
        let engine = Rc::clone(self.engine());
        engine
            .start_debugging()
            .map_err(|e| self.engine_failure(e))?;
        engine.set_break_on_exception(self.config().debugger.break_on_uncaught);
        self.debugger.on_break = Some(Rc::new(on_break));
        self.debugger.on_throw = Some(Rc::new(on_throw));
        self.debugger.enabled = true;
        self.debugger.detach_requested = false;
        for script in engine.scripts() {
            self.script_compiled(script.script_id, &script.filename);
        }
        info!(session = %self.id(), "debugging enabled");
        Ok(())
    }

    /// Turns debugging off and drops the callbacks and the channel.
    pub fn debug_uninit(&mut self) {
        self.finish_detach();
        self.debugger.on_break = None;
        self.debugger.on_throw = None;
    }

    /// Detaches the debugger, leaving the engine running freely. Called from
    /// inside a break callback, the detach happens once the callback returns.
    pub fn debug_detach(&mut self) {
        if self.debugger.in_callback {
            debug!("detach deferred until the break callback returns");
            self.debugger.detach_requested = true;
        } else {
            self.finish_detach();
        }
    }

    pub(crate) fn finish_detach(&mut self) {
        self.debugger.detach_requested = false;
        if !self.debugger.enabled {
            return;
        }
        let engine = self.engine();
        engine.set_step_type(StepType::Continue);
        engine.stop_debugging();
        self.debugger.enabled = false;
        self.debugger.channel = None;
        info!(session = %self.id(), "debugger detached");
    }

    pub fn is_debugging(&self) -> bool {
        self.debugger.enabled
    }

    /// Whether a thrown exception pauses the engine.
    pub fn debug_on_throw(&mut self, enabled: bool) {
        self.engine().set_break_on_exception(enabled);
    }

    /// Adds a breakpoint at a 1-based position and returns its index. It is
    /// resolved now if the file is already compiled, otherwise as soon as it
    /// is. A file compiled more than once resolves against its latest script.
    pub fn breakpoint_add(&mut self, filename: &str, line: u32, column: u32) -> usize {
        let index = self.debugger.breakpoints.add(filename, line, column);
        let script_id = self
            .engine()
            .scripts()
            .into_iter()
            .rev()
            .find(|script| script.filename == filename)
            .map(|script| script.script_id);
        if let Some(script_id) = script_id {
            self.script_compiled(script_id, filename);
        }
        index
    }

    pub fn breakpoint_remove(&mut self, index: usize) -> bool {
        match self.debugger.breakpoints.remove(index) {
            Some(entry) => {
                if entry.is_resolved() {
                    if let Err(e) = self.engine().remove_breakpoint(entry.id) {
                        debug!(id = entry.id, "engine breakpoint already gone: {}", e);
                    }
                }
                true
            }
            None => false,
        }
    }

    pub fn breakpoint(&self, index: usize) -> Option<&BreakpointEntry> {
        self.debugger.breakpoints.get(index)
    }

    /// Engine id of a breakpoint; 0 while it is pending.
    pub fn breakpoint_id(&self, index: usize) -> Option<u32> {
        self.debugger.breakpoints.get(index).map(|e| e.id)
    }

    pub fn breakpoint_count(&self) -> usize {
        self.debugger.breakpoints.len()
    }

    /// Asks the engine to pause at the next statement.
    pub fn breakpoint_inject(&mut self) {
        self.engine().request_async_break();
    }

    /// Source text of a compiled file, as seen when it was compiled.
    pub fn debug_source(&self, filename: &str) -> Option<&str> {
        self.debugger.sources.get(filename).map(|s| s.as_str())
    }

    /// Hooks up a client connection, waiting up to the configured attach
    /// timeout for it to come up.
    pub fn attach_transport(&mut self, transport: Box<dyn Transport>) -> Result<(), TransportError> {
        let config = &self.config().debugger;
        let timeout = config.attach_timeout();
        let mut channel = DebugChannel::new(transport, config.poll_interval());
        channel.wait_for_attach(timeout)?;
        self.debugger.channel = Some(channel);
        Ok(())
    }

    pub fn debug_channel(&mut self) -> Option<&mut DebugChannel> {
        self.debugger.channel.as_mut()
    }
}
