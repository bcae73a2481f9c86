//! The host side of the engine boundary.
//!
//! - **[`session`]** - the [`Session`](session::Session) context and the value stack API
//! - **[`call`]** - native functions and script calls
//! - **[`object`]** - native classes, host data, property descriptors and iterators
//! - **[`protect`]** - protected regions and the catch stack
//! - **[`module`]** - module resolution, caching and the job queue
//! - **[`debug`]** - the debugger bridge
//! - **[`plugin`]** - native function records and configuration
//! - **[`ds`]** - values, handles, errors and the stack itself
//! - **[`std_lib`]** - the console

pub mod call;
pub mod debug;
pub mod ds;
pub mod module;
pub mod object;
pub mod plugin;
pub mod protect;
pub mod session;
pub mod std_lib;
