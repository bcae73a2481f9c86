//! Console built-in object.
//!
//! Provides console.log, console.info, console.warn and console.error. All
//! four share one native callback and tell themselves apart by `magic`.

use crate::runner::ds::error::JsResult;
use crate::runner::plugin::types::{CallInfo, NativeFunction};
use crate::runner::session::Session;

const LOG: i32 = 0;
const INFO: i32 = 1;
const WARN: i32 = 2;
const ERROR: i32 = 3;

const METHODS: [(&str, i32); 4] = [("log", LOG), ("info", INFO), ("warn", WARN), ("error", ERROR)];

/// Installs `console` on the global object.
pub fn register(session: &mut Session) -> JsResult<()> {
    session.push_object();
    for (name, magic) in METHODS.iter() {
        session.register_function(NativeFunction::new(*name, console_print).with_magic(*magic));
        session.put_prop_string(-2, name)?;
    }
    session.put_global_string("console")
}

/// Joins the call's arguments with spaces, strings unquoted.
pub(crate) fn format_args(session: &Session, count: usize) -> JsResult<String> {
    let mut parts = Vec::with_capacity(count);
    for i in 0..count {
        let raw = session.slot(i as i32)?;
        let text = session
            .engine()
            .to_display_string(raw)
            .map_err(|e| session.engine_failure(e))?;
        parts.push(text);
    }
    Ok(parts.join(" "))
}

fn console_print(session: &mut Session, info: &CallInfo) -> JsResult<bool> {
    let line = format_args(session, info.num_args)?;
    match info.magic {
        WARN | ERROR => eprintln!("{}", line),
        _ => println!("{}", line),
    }
    Ok(false)
}
