//! Native function plumbing and host configuration.
//!
//! Native functions are described by a [`NativeFunction`] record (callback,
//! name, minimum argument count, constructor-only flag and a `magic`
//! discriminator) and stored in the session's [`FunctionRegistry`]. The
//! engine only ever sees the record's [`FunctionId`](crate::engine::FunctionId)
//! and hands it back on every call.

pub mod config;
pub mod registry;
pub mod types;

pub use config::{ConfigError, HostConfig};
pub use registry::FunctionRegistry;
pub use types::{CallInfo, NativeCallback, NativeFn, NativeFunction};
