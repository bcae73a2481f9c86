//! # jshost - drive a script engine from Rust through a value stack
//!
//! The host layer sits between native code and a script engine:
//! - a value stack of owned and borrowed handles, addressed relative to the
//!   current call frame
//! - native functions callable from script, and script functions callable from
//!   native code
//! - protected regions that unwind the stack cleanly when an error crosses them
//! - an eager module loader with a cache and a job queue
//! - a synchronous debugger bridge with a breakpoint table
//!
//! The engine itself is behind the [`engine::Engine`] trait.
//! [`engine::sandbox::SandboxEngine`] is a small in-process implementation.
//!
//! ## Quick Start
//!
//! ### Calling native code from script
//!
//! ```
//! use std::rc::Rc;
//! use jshost::engine::sandbox::SandboxEngine;
//! use jshost::runner::ds::error::JsResult;
//! use jshost::runner::plugin::types::{CallInfo, NativeFunction};
//! use jshost::runner::session::Session;
//!
//! fn add(session: &mut Session, _info: &CallInfo) -> JsResult<bool> {
//!     let sum = session.require_number(0)? + session.require_number(1)?;
//!     session.push_number(sum);
//!     Ok(true)
//! }
//!
//! let mut session = Session::new(Rc::new(SandboxEngine::new()));
//! session
//!     .register_global(NativeFunction::new("add", add).with_min_args(2))
//!     .unwrap();
//! session.push_eval("add(2, 3) * 10").unwrap();
//! assert_eq!(session.get_number(-1), 50.0);
//! ```
//!
//! ### Catching script errors
//!
//! ```
//! use std::rc::Rc;
//! use jshost::engine::sandbox::SandboxEngine;
//! use jshost::runner::session::Session;
//!
//! let mut session = Session::new(Rc::new(SandboxEngine::new()));
//! session.push_string("throw new TypeError('bad input');");
//! assert!(session.try_compile("input.js"));
//! assert!(!session.try_call(0));
//! assert!(session.is_error(-1));
//! assert_eq!(session.get_top(), 1);
//! ```
//!
//! ### Loading modules
//!
//! ```
//! use std::rc::Rc;
//! use jshost::engine::sandbox::SandboxEngine;
//! use jshost::runner::module::resolver::MemoryResolver;
//! use jshost::runner::session::Session;
//!
//! let mut session = Session::new(Rc::new(SandboxEngine::new()));
//! session.set_resolver(
//!     MemoryResolver::default()
//!         .with_module("util.mjs", "export function twice(x) { return x * 2; }"),
//! );
//! session.push_string("import { twice } from './util.mjs'; export let answer = twice(21);");
//! session.eval_module("main.mjs").unwrap();
//! session.get_prop_string(-1, "answer").unwrap();
//! assert_eq!(session.get_number(-1), 42.0);
//! ```
//!
//! ## Architecture
//!
//! - **[`engine`]** - the engine trait and the sandbox engine
//! - **[`runner`]** - the host layer
//!   - **[`runner::session`]** - the session and its value stack API
//!   - **[`runner::call`]** - the call bridge
//!   - **[`runner::protect`]** - protected regions
//!   - **[`runner::module`]** - module loading
//!   - **[`runner::debug`]** - the debugger bridge

#[macro_use]
extern crate lazy_static;

pub mod engine;
pub mod runner;
