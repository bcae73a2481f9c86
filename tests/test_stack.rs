//! Tests for the value stack and reference lifetimes.
//!
//! These drive a session directly from Rust: pushing and reading typed
//! values, reshaping the stack, and keeping values alive past their slots.

extern crate jshost;

use std::rc::Rc;

use jshost::engine::sandbox::SandboxEngine;
use jshost::runner::ds::error::ErrorKind;
use jshost::runner::ds::value::{BufferType, JsValue, ObjectClass};
use jshost::runner::session::Session;

fn session() -> Session {
    Session::new(Rc::new(SandboxEngine::new()))
}

// ============================================================================
// Push and read
// ============================================================================

mod push_tests {
    use super::*;

    #[test]
    fn test_push_returns_frame_index() {
        let mut s = session();
        assert_eq!(s.push_int(1), 0);
        assert_eq!(s.push_string("two"), 1);
        assert_eq!(s.push_null(), 2);
        assert_eq!(s.get_top(), 3);
    }

    #[test]
    fn test_pop_keeps_lower_slots() {
        let mut s = session();
        s.push_int(10);
        s.push_int(20);
        s.push_int(30);
        s.pop(1).unwrap();
        assert_eq!(s.get_top(), 2);
        assert_eq!(s.get_int(0), 10);
        assert_eq!(s.get_int(1), 20);
        assert_eq!(s.normalize(-1).unwrap(), 1);
        assert!(s.normalize(2).is_err());
    }

    #[test]
    fn test_negative_indices_count_from_top() {
        let mut s = session();
        s.push_number(1.5);
        s.push_boolean(true);
        s.push_string("last");
        assert_eq!(s.get_string(-1).as_deref(), Some("last"));
        assert!(s.get_boolean(-2));
        assert_eq!(s.get_number(-3), 1.5);
        assert_eq!(s.normalize(-3).unwrap(), 0);
        assert!(s.normalize(-4).is_err());
    }

    #[test]
    fn test_type_predicates() {
        let mut s = session();
        s.push_undefined();
        s.push_null();
        s.push_object();
        s.push_array();
        s.push_symbol("tag");
        s.push_buffer(BufferType::Uint8, 4);
        assert!(s.is_undefined(0));
        assert!(s.is_null(1));
        assert!(s.is_object(2) && !s.is_array(2));
        assert!(s.is_array(3));
        assert!(s.is_symbol(4));
        assert!(s.is_buffer(5));
        assert!(!s.is_string(9));
    }

    #[test]
    fn test_lenient_getters_default_on_mismatch() {
        let mut s = session();
        s.push_string("not a number");
        assert!(s.get_number(0).is_nan());
        assert_eq!(s.get_int(0), 0);
        assert!(!s.get_boolean(0));
        assert_eq!(s.get_string(7), None);
        assert_eq!(s.get_length(0), 12);
    }

    #[test]
    fn test_buffer_contents() {
        let mut s = session();
        s.push_buffer(BufferType::Uint8, 3);
        assert_eq!(s.get_buffer(-1), Some(vec![0, 0, 0]));
        assert_eq!(s.require_buffer(-1).unwrap().len(), 3);
    }

    #[test]
    fn test_inspect_snapshots_value() {
        let mut s = session();
        s.push_error(jshost::runner::ds::error::ErrorType::RangeError, "out");
        assert_eq!(s.inspect(-1).unwrap(), JsValue::Object(ObjectClass::Error));
        assert!(s.is_error(-1));
    }
}

// ============================================================================
// Strict access
// ============================================================================

mod require_tests {
    use super::*;

    #[test]
    fn test_require_mismatch_is_type_error() {
        let mut s = session();
        s.push_string("x");
        let e = s.require_number(0).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::TypeMismatch);
        assert!(e.message().contains("number required, found string"));
    }

    #[test]
    fn test_require_bad_index_is_range_error() {
        let mut s = session();
        let e = s.require_boolean(3).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidStackIndex);
        assert!(e.message().starts_with("RangeError"));
    }

    #[test]
    fn test_require_success() {
        let mut s = session();
        s.push_int(-7);
        s.push_uint(7);
        s.push_string("ok");
        s.push_object();
        assert_eq!(s.require_int(0).unwrap(), -7);
        assert_eq!(s.require_uint(1).unwrap(), 7);
        assert_eq!(s.require_string(2).unwrap(), "ok");
        assert!(s.require_object(3).is_ok());
        assert!(s.require_object_coercible(2).is_ok());
    }

    #[test]
    fn test_object_coercible_rejects_nullish() {
        let mut s = session();
        s.push_null();
        assert!(s.require_object_coercible(0).is_err());
    }
}

// ============================================================================
// Reshaping
// ============================================================================

mod shape_tests {
    use super::*;

    fn push_abc(s: &mut Session) {
        s.push_string("a");
        s.push_string("b");
        s.push_string("c");
    }

    fn contents(s: &Session) -> Vec<String> {
        (0..s.get_top() as i32)
            .map(|i| s.get_string(i).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_insert_moves_top_down() {
        let mut s = session();
        push_abc(&mut s);
        s.insert(0).unwrap();
        assert_eq!(contents(&s), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_pull_moves_slot_up() {
        let mut s = session();
        push_abc(&mut s);
        s.pull(0).unwrap();
        assert_eq!(contents(&s), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_remove_and_replace() {
        let mut s = session();
        push_abc(&mut s);
        s.remove(1).unwrap();
        assert_eq!(contents(&s), vec!["a", "c"]);
        s.replace(0).unwrap();
        assert_eq!(contents(&s), vec!["c"]);
    }

    #[test]
    fn test_dup_copies_slot() {
        let mut s = session();
        push_abc(&mut s);
        s.dup(0).unwrap();
        assert_eq!(s.get_top(), 4);
        assert!(s.equal(0, -1));
    }

    #[test]
    fn test_set_top_grows_with_undefined_and_shrinks() {
        let mut s = session();
        s.push_int(1);
        s.set_top(3);
        assert!(s.is_undefined(2));
        s.set_top(1);
        assert_eq!(s.get_top(), 1);
    }

    #[test]
    fn test_pop_underflow_leaves_stack_alone() {
        let mut s = session();
        s.push_int(1);
        let e = s.pop(2).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidStackIndex);
        assert_eq!(s.get_top(), 1);
    }
}

// ============================================================================
// Conversions and properties
// ============================================================================

mod value_tests {
    use super::*;

    #[test]
    fn test_conversions_replace_in_place() {
        let mut s = session();
        s.push_string("42");
        assert_eq!(s.to_number(0).unwrap(), 42.0);
        assert!(s.is_number(0));
        assert_eq!(s.to_string(0).unwrap(), "42");
        assert!(s.is_string(0));
        s.push_number(3.9);
        assert_eq!(s.to_int(-1).unwrap(), 3);
        s.push_string("");
        assert!(!s.to_boolean(-1).unwrap());
    }

    #[test]
    fn test_to_int_wraps_like_bitwise_operators() {
        let mut s = session();
        s.push_number(4294967297.0);
        assert_eq!(s.to_int(-1).unwrap(), 1);
        assert_eq!(s.get_number(-1), 1.0);
        s.push_number(2147483648.0);
        assert_eq!(s.to_int(-1).unwrap(), i32::MIN);
        s.push_string("-7.9");
        assert_eq!(s.to_int(-1).unwrap(), -7);
        s.push_number(f64::INFINITY);
        assert_eq!(s.to_int(-1).unwrap(), 0);
        s.push_number(-1.0);
        assert_eq!(s.get_uint(-1), u32::MAX);
        assert_eq!(s.require_int(-1).unwrap(), -1);
    }

    #[test]
    fn test_write_buffer_in_place() {
        let mut s = session();
        s.push_buffer(BufferType::Uint8, 4);
        s.write_buffer(-1, 1, &[7, 8]).unwrap();
        assert_eq!(s.get_buffer(-1), Some(vec![0, 7, 8, 0]));
        s.get_prop_index(-1, 2).unwrap();
        assert_eq!(s.get_int(-1), 8);
        s.pop(1).unwrap();

        let e = s.write_buffer(-1, 3, &[1, 2]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Host);
        assert!(e.message().contains("overflows"));
        assert_eq!(s.get_buffer(-1), Some(vec![0, 7, 8, 0]));

        s.push_object();
        let e = s.write_buffer(-1, 0, &[1]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_to_object_wraps_primitives() {
        let mut s = session();
        s.push_string("abc");
        s.to_object(-1).unwrap();
        assert!(s.is_object(-1));
        assert!(!s.is_string(-1));
        assert_eq!(s.get_length(-1), 3);
        assert_eq!(s.to_string(-1).unwrap(), "abc");

        s.push_number(2.5);
        s.to_object(-1).unwrap();
        assert_eq!(s.to_number(-1).unwrap(), 2.5);

        s.push_object();
        s.dup(-1).unwrap();
        s.to_object(-1).unwrap();
        assert!(s.equal(-1, -2));

        s.push_null();
        let e = s.to_object(-1).unwrap_err();
        assert!(e.message().starts_with("TypeError"));
        assert!(s.is_null(-1));
    }

    #[test]
    fn test_json_round_trip_through_stack() {
        let mut s = session();
        s.push_json(r#"{"a":1,"b":[true,null]}"#).unwrap();
        assert!(s.is_object(-1));
        s.stringify(-1).unwrap();
        assert_eq!(s.get_string(-1).as_deref(), Some(r#"{"a":1,"b":[true,null]}"#));
        s.push_undefined();
        s.stringify(-1).unwrap();
        assert!(s.is_undefined(-1));
    }

    #[test]
    fn test_bad_json_is_syntax_error() {
        let mut s = session();
        s.push_string("{oops");
        assert!(!s.try_parse());
        assert!(s.is_error(-1));
        assert_eq!(s.get_top(), 1);
    }

    #[test]
    fn test_property_round_trip() {
        let mut s = session();
        s.push_object();
        s.push_int(5);
        s.put_prop_string(0, "five").unwrap();
        assert!(s.has_prop_string(0, "five").unwrap());
        assert!(s.get_prop_string(0, "five").unwrap());
        assert_eq!(s.get_int(-1), 5);
        s.pop(1).unwrap();
        assert_eq!(s.own_keys(0).unwrap(), vec!["five".to_string()]);
        assert!(s.del_prop_string(0, "five").unwrap());
        assert!(!s.get_prop_string(0, "five").unwrap());
    }

    #[test]
    fn test_keyed_property_access() {
        let mut s = session();
        s.push_array();
        s.push_uint(0);
        s.push_string("zero");
        s.put_prop(0).unwrap();
        s.push_uint(0);
        assert!(s.get_prop(0).unwrap());
        assert_eq!(s.get_string(-1).as_deref(), Some("zero"));
        s.pop(1).unwrap();
        s.push_uint(0);
        assert!(s.has_prop(0).unwrap());
        assert_eq!(s.get_top(), 1);
    }

    #[test]
    fn test_globals() {
        let mut s = session();
        s.push_string("hello");
        s.put_global_string("greeting").unwrap();
        s.push_eval("greeting + ' world'").unwrap();
        assert_eq!(s.get_string(-1).as_deref(), Some("hello world"));
        assert!(s.del_global_string("greeting").unwrap());
        assert!(!s.get_global_string("greeting").unwrap());
    }

    #[test]
    fn test_prototype_chain() {
        let mut s = session();
        s.push_bare_object();
        s.push_object();
        s.push_int(1);
        s.put_prop_string(1, "inherited").unwrap();
        s.set_prototype(0).unwrap();
        assert_eq!(s.get_top(), 1);
        assert!(s.get_prop_string(0, "inherited").unwrap());
        s.pop(1).unwrap();
        s.get_prototype(0).unwrap();
        assert!(s.is_object(-1));
    }

    #[test]
    fn test_stash_is_stable() {
        let mut s = session();
        s.push_stash();
        s.push_int(9);
        s.put_prop_string(0, "kept").unwrap();
        s.pop(1).unwrap();
        s.push_stash();
        assert!(s.get_prop_string(-1, "kept").unwrap());
        assert_eq!(s.get_int(-1), 9);
    }
}

// ============================================================================
// References
// ============================================================================

mod reference_tests {
    use super::*;

    #[test]
    fn test_slots_hold_a_reference() {
        let mut s = session();
        s.push_object();
        let reference = s.ref_value(-1).unwrap();
        assert_eq!(reference.ref_count(), 2);
        s.pop(1).unwrap();
        assert_eq!(reference.ref_count(), 1);
        reference.release();
    }

    #[test]
    fn test_borrowed_slots_leave_counts_alone() {
        let mut s = session();
        s.push_global_object();
        let global = s.ref_value(-1).unwrap();
        let count = global.ref_count();
        s.push_global_object();
        assert_eq!(global.ref_count(), count);
        s.pop(2).unwrap();
        assert_eq!(global.ref_count(), count);
        global.release();
    }

    #[test]
    fn test_reference_outlives_slot_and_gc() {
        let mut s = session();
        s.push_string("survivor");
        let reference = s.ref_value(-1).unwrap();
        s.pop(1).unwrap();
        s.gc();
        s.push_ref(&reference);
        assert_eq!(s.get_string(-1).as_deref(), Some("survivor"));
        reference.release();
    }

    #[test]
    fn test_unreferenced_values_are_collected() {
        let mut s = session();
        s.push_string("temporary");
        s.pop(1).unwrap();
        assert!(s.gc() >= 1);
    }

    #[test]
    fn test_reinit_empties_the_session() {
        let mut s = session();
        s.push_int(1);
        s.push_eval("let leftover = 1;").unwrap();
        s.reinit();
        assert_eq!(s.get_top(), 0);
        assert!(!s.get_global_string("leftover").unwrap());
        s.push_stash();
        assert!(s.is_object(-1));
    }
}

// ============================================================================
// Descriptors, iteration and the execution switch
// ============================================================================

mod object_tests {
    use super::*;

    fn define_scale(s: &mut Session) {
        s.push_eval(
            "function twice() { return this.base * 2; }
             function halve(v) { this.base = v / 2; }",
        )
        .unwrap();
        s.pop(1).unwrap();
    }

    #[test]
    fn test_def_prop_accessor_pair() {
        let mut s = session();
        define_scale(&mut s);
        s.push_object();
        s.push_int(21);
        s.put_prop_string(0, "base").unwrap();

        s.push_object();
        s.get_global_string("twice").unwrap();
        s.put_prop_string(-2, "get").unwrap();
        s.get_global_string("halve").unwrap();
        s.put_prop_string(-2, "set").unwrap();
        s.def_prop_string(0, "doubled").unwrap();
        assert_eq!(s.get_top(), 1);

        s.get_prop_string(0, "doubled").unwrap();
        assert_eq!(s.get_number(-1), 42.0);
        s.pop(1).unwrap();
        s.push_int(100);
        s.put_prop_string(0, "doubled").unwrap();
        s.get_prop_string(0, "base").unwrap();
        assert_eq!(s.get_number(-1), 50.0);
        s.pop(1).unwrap();
        assert_eq!(s.own_keys(0).unwrap(), vec!["base".to_string()]);

        s.dup(0).unwrap();
        s.put_global_string("scaled").unwrap();
        s.push_eval("scaled.doubled = 8; scaled.doubled + scaled.base").unwrap();
        assert_eq!(s.get_number(-1), 12.0);
    }

    #[test]
    fn test_def_prop_read_only_value() {
        let mut s = session();
        s.push_object();
        s.push_string("fixed");
        s.push_object();
        s.push_int(5);
        s.put_prop_string(-2, "value").unwrap();
        s.push_boolean(true);
        s.put_prop_string(-2, "enumerable").unwrap();
        s.def_prop(0).unwrap();
        assert_eq!(s.get_top(), 1);

        s.push_int(6);
        let e = s.put_prop_string(0, "fixed").unwrap_err();
        assert!(e.message().starts_with("TypeError"));
        s.set_top(1);
        s.get_prop_string(0, "fixed").unwrap();
        assert_eq!(s.get_int(-1), 5);
        s.pop(1).unwrap();
        assert!(!s.del_prop_string(0, "fixed").unwrap());
        assert_eq!(s.own_keys(0).unwrap(), vec!["fixed".to_string()]);

        s.push_object();
        s.push_int(1);
        s.put_prop_string(-2, "value").unwrap();
        let e = s.def_prop_string(0, "fixed").unwrap_err();
        assert!(e.message().contains("cannot redefine property"));
    }

    #[test]
    fn test_def_prop_rejects_non_callable_getter() {
        let mut s = session();
        s.push_array();
        s.push_object();
        s.push_int(3);
        s.put_prop_string(-2, "get").unwrap();
        assert!(s.def_prop_index(0, 0).is_err());
        s.set_top(1);
        assert_eq!(s.get_length(0), 0);
    }

    #[test]
    fn test_iterate_array_values() {
        let mut s = session();
        s.push_eval("[10, 20, 30]").unwrap();
        assert_eq!(s.push_new_iterator(0).unwrap(), 1);
        let mut seen = Vec::new();
        while s.next(1).unwrap() {
            seen.push(s.get_int(-1));
            s.pop(1).unwrap();
        }
        assert_eq!(seen, vec![10, 20, 30]);
        assert_eq!(s.get_top(), 2);
        assert!(!s.next(1).unwrap());
        assert_eq!(s.own_keys(1).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_iterate_object_keys() {
        let mut s = session();
        s.push_eval("({ width: 3, height: 4 })").unwrap();
        s.push_new_iterator(-1).unwrap();
        s.push_int(0);
        s.put_prop_string(0, "depth").unwrap();
        let mut keys = Vec::new();
        while s.next(-1).unwrap() {
            keys.push(s.require_string(-1).unwrap());
            s.pop(1).unwrap();
        }
        assert_eq!(keys, vec!["width", "height"]);

        s.push_int(1);
        let e = s.push_new_iterator(-1).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_iterate_script_iterator() {
        let mut s = session();
        s.push_eval(
            "let n = 0;
             let counter = { next: function() { n = n + 1; return { done: n === 4, value: n * 2 }; } };
             counter",
        )
        .unwrap();
        let mut seen = Vec::new();
        while s.next(0).unwrap() {
            seen.push(s.get_int(-1));
            s.pop(1).unwrap();
        }
        assert_eq!(seen, vec![2, 4, 6]);
        assert_eq!(s.get_top(), 1);
    }

    #[test]
    fn test_disable_stops_script_execution() {
        let mut s = session();
        s.set_disabled(true);
        assert!(s.is_disabled());
        assert!(s.engine().is_disabled());
        assert!(s.push_eval("1").is_err());
        s.push_int(4);
        assert_eq!(s.get_int(-1), 4);
        s.set_disabled(false);
        s.push_eval("2 * 3").unwrap();
        assert_eq!(s.get_int(-1), 6);
    }
}
