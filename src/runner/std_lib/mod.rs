//! Standard library natives, registered through the call bridge.

pub mod console;

use crate::runner::ds::error::JsResult;
use crate::runner::session::Session;

/// Installs every standard library object on the session's global object.
pub fn register_std_lib(session: &mut Session) -> JsResult<()> {
    console::register(session)
}
