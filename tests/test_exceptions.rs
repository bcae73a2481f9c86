//! Tests for error propagation between script and native code.
//!
//! Every failure either lands in a protected region, with the stack cut back
//! to where the region started and the error on top, or comes back to the
//! caller as an `Exception`.

extern crate jshost;

use std::rc::Rc;

use jshost::engine::sandbox::SandboxEngine;
use jshost::runner::ds::error::{ErrorKind, ErrorType, JsResult};
use jshost::runner::plugin::types::{CallInfo, NativeFunction};
use jshost::runner::session::Session;

fn session() -> Session {
    Session::new(Rc::new(SandboxEngine::new()))
}

fn native_throw_string(s: &mut Session, _info: &CallInfo) -> JsResult<bool> {
    s.push_string("plain string");
    s.throw()
}

fn native_require_string(s: &mut Session, _info: &CallInfo) -> JsResult<bool> {
    let text = s.require_string(0)?;
    s.push_string(&text.to_uppercase());
    Ok(true)
}

// ============================================================================
// Protected calls
// ============================================================================

#[test]
fn test_try_call_success_leaves_result() {
    let mut s = session();
    s.push_eval("function ok() { return 'fine'; }").unwrap();
    s.pop(1).unwrap();
    s.get_global_string("ok").unwrap();
    assert!(s.try_call(0));
    assert_eq!(s.get_string(-1).as_deref(), Some("fine"));
    assert_eq!(s.get_top(), 1);
}

#[test]
fn test_try_call_failure_replaces_operands_with_error() {
    let mut s = session();
    s.push_string("below");
    s.push_eval("function bad(a, b) { throw new RangeError('out of range'); }")
        .unwrap();
    s.pop(1).unwrap();
    s.get_global_string("bad").unwrap();
    s.push_int(1);
    s.push_int(2);
    assert!(!s.try_call(2));
    assert_eq!(s.get_top(), 2);
    assert_eq!(s.get_string(0).as_deref(), Some("below"));
    assert!(s.is_error(-1));
    s.get_prop_string(-1, "message").unwrap();
    assert_eq!(s.get_string(-1).as_deref(), Some("out of range"));
}

#[test]
fn test_try_construct_failure() {
    let mut s = session();
    s.push_int(5);
    assert!(!s.try_construct(0));
    assert_eq!(s.get_top(), 1);
    assert!(s.is_error(-1));
}

#[test]
fn test_try_compile_syntax_error() {
    let mut s = session();
    s.push_string("function (");
    assert!(!s.try_compile("broken.js"));
    assert_eq!(s.get_top(), 1);
    s.get_prop_string(-1, "name").unwrap();
    assert_eq!(s.get_string(-1).as_deref(), Some("SyntaxError"));
}

#[test]
fn test_thrown_non_error_value_is_preserved() {
    let mut s = session();
    s.register_function(NativeFunction::new("throwString", native_throw_string));
    assert!(!s.try_call(0));
    assert_eq!(s.get_string(-1).as_deref(), Some("plain string"));
}

#[test]
fn test_script_throwing_a_number() {
    let mut s = session();
    let e = s.push_eval("throw 7;").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Script);
    assert_eq!(e.message(), "7");
}

// ============================================================================
// Errors crossing both directions
// ============================================================================

#[test]
fn test_type_mismatch_in_native_surfaces_in_script() {
    let mut s = session();
    s.register_global(NativeFunction::new("shout", native_require_string))
        .unwrap();
    s.push_eval("shout('hey')").unwrap();
    assert_eq!(s.get_string(-1).as_deref(), Some("HEY"));
    let e = s.push_eval("shout(1)").unwrap_err();
    assert_eq!(e.kind(), ErrorKind::TypeMismatch);
    assert!(e.message().contains("string required, found number"));
    assert_eq!(s.get_top(), 1);
}

#[test]
fn test_script_error_unwinds_through_native() {
    let mut s = session();
    s.register_global(NativeFunction::from_closure("call", |s, _| {
        s.dup(0)?;
        s.call(0)?;
        Ok(true)
    }))
    .unwrap();
    let e = s
        .push_eval("function boom() { throw new Error('deep'); } call(boom)")
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Script);
    assert_eq!(e.message(), "Error: deep");
    assert_eq!(s.get_top(), 0);
    assert_eq!(s.catch_depth(), 0);
}

#[test]
fn test_native_can_recover_from_script_error() {
    let mut s = session();
    s.register_global(NativeFunction::from_closure("attempt", |s, _| {
        s.dup(0)?;
        if s.try_call(0) {
            s.push_string("succeeded");
        } else {
            s.push_string("recovered");
        }
        Ok(true)
    }))
    .unwrap();
    s.push_eval("function boom() { throw new Error('x'); } attempt(boom)")
        .unwrap();
    assert_eq!(s.get_string(-1).as_deref(), Some("recovered"));
}

#[test]
fn test_exception_keeps_value_alive() {
    let mut s = session();
    let e = s.push_eval("throw new Error('held');").unwrap_err();
    s.gc();
    assert_eq!(e.value().ref_count(), 1);
    s.push_int(0);
    let held = s.protect(|_| -> JsResult<()> { Err(e) }).unwrap_err();
    assert_eq!(held.message(), "Error: held");
    assert!(s.is_error(-1));
}

// ============================================================================
// Protected regions
// ============================================================================

#[test]
fn test_protect_success_keeps_pushes() {
    let mut s = session();
    let n = s
        .protect(|s| {
            s.push_int(1);
            s.push_int(2);
            Ok(s.get_top())
        })
        .unwrap();
    assert_eq!(n, 2);
    assert_eq!(s.get_top(), 2);
}

#[test]
fn test_protect_pads_slots_popped_before_failure() {
    let mut s = session();
    s.push_string("kept");
    s.push_string("consumed");
    s.push_string("also consumed");
    let e = s
        .protect(|s| -> JsResult<()> {
            s.pop(2)?;
            s.error(ErrorType::RangeError, "after pop")
        })
        .unwrap_err();
    assert_eq!(e.message(), "RangeError: after pop");
    assert_eq!(s.get_top(), 4);
    assert_eq!(s.get_string(0).as_deref(), Some("kept"));
    assert!(s.is_undefined(1));
    assert!(s.is_undefined(2));
    assert!(s.is_error(3));
}

#[test]
fn test_protect_restores_receiver_after_native_failure() {
    let mut s = session();
    s.register_function(NativeFunction::from_closure("fails", |s, _| {
        s.error(ErrorType::UriError, "nope")
    }));
    s.push_object();
    assert!(!s.try_call_method(0));
    s.push_this();
    assert!(s.is_undefined(-1));
}

#[test]
fn test_try_native_runs_with_own_frame() {
    let mut s = session();
    s.push_string("outside");
    s.push_int(2);
    s.push_int(3);
    let ok = s.try_native(2, |s| {
        assert_eq!(s.get_top(), 2);
        let product = s.require_int(0)? * s.require_int(1)?;
        s.push_int(product);
        Ok(true)
    });
    assert!(ok);
    assert_eq!(s.get_top(), 2);
    assert_eq!(s.get_int(-1), 6);
}

#[test]
fn test_try_native_failure() {
    let mut s = session();
    s.push_int(2);
    let ok = s.try_native(1, |s| {
        s.push_int(99);
        s.error(ErrorType::Error, "stop")
    });
    assert!(!ok);
    assert_eq!(s.get_top(), 1);
    assert!(s.is_error(-1));
}

#[test]
fn test_failed_native_releases_its_frame() {
    let mut s = session();
    let mut kept = None;
    let ok = s.try_native(0, |s| {
        s.push_object();
        s.push_string("temporary");
        kept = Some(s.ref_value(0)?);
        s.error(ErrorType::Error, "abandon")
    });
    assert!(!ok);
    assert_eq!(s.get_top(), 1);
    let kept = kept.unwrap();
    assert_eq!(kept.ref_count(), 1);
    kept.release();
}

#[test]
fn test_error_kinds_for_host_operations() {
    let mut s = session();
    assert_eq!(s.pop(1).unwrap_err().kind(), ErrorKind::InvalidStackIndex);
    s.push_null();
    assert_eq!(s.require_object(0).unwrap_err().kind(), ErrorKind::TypeMismatch);
    let e: JsResult<()> = s.error(ErrorType::ReferenceError, "gone");
    let e = e.unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Host);
    assert_eq!(e.to_string(), "ReferenceError: gone");
}

#[test]
fn test_unguarded_passes_success_through() {
    let mut s = session();
    let v = s.unguarded(|s| {
        s.push_int(4);
        s.require_int(-1)
    });
    assert_eq!(v, 4);
}
