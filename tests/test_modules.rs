//! Tests for module loading.
//!
//! Covers specifier resolution (in memory and on disk), the module cache,
//! the job queue, dynamic imports and how failures stick to their records.

extern crate jshost;
extern crate tempfile;

use std::fs;
use std::rc::Rc;

use jshost::engine::sandbox::SandboxEngine;
use jshost::runner::ds::error::ErrorKind;
use jshost::runner::module::resolver::{FsResolver, MemoryResolver};
use jshost::runner::plugin::config::ModulesConfig;
use jshost::runner::session::Session;

fn session_with(resolver: MemoryResolver) -> Session {
    let mut s = Session::new(Rc::new(SandboxEngine::new()));
    s.set_resolver(resolver);
    s
}

fn eval_main(s: &mut Session, source: &str) -> jshost::runner::ds::error::JsResult<()> {
    s.push_string(source);
    s.eval_module("main.mjs")
}

// ============================================================================
// Static imports
// ============================================================================

mod import_tests {
    use super::*;

    #[test]
    fn test_named_import() {
        let mut s = session_with(
            MemoryResolver::default().with_module("math.mjs", "export function square(x) { return x * x; }"),
        );
        eval_main(&mut s, "import { square } from './math.mjs'; export let nine = square(3);")
            .unwrap();
        s.get_prop_string(-1, "nine").unwrap();
        assert_eq!(s.get_number(-1), 9.0);
    }

    #[test]
    fn test_namespace_import() {
        let mut s = session_with(
            MemoryResolver::default()
                .with_module("config.mjs", "export let name = 'demo'; export let version = 2;"),
        );
        eval_main(
            &mut s,
            "import * as config from './config.mjs'; export let label = config.name + '@' + config.version;",
        )
        .unwrap();
        s.get_prop_string(-1, "label").unwrap();
        assert_eq!(s.get_string(-1).as_deref(), Some("demo@2"));
    }

    #[test]
    fn test_nested_relative_specifiers() {
        let mut s = session_with(
            MemoryResolver::default()
                .with_module("app/ui/view.mjs", "import { base } from '../core.mjs'; export let view = base + '/view';")
                .with_module("app/core.mjs", "export let base = 'core';"),
        );
        s.push_string("import { view } from './ui/view.mjs'; export let out = view;");
        s.eval_module("app/main.mjs").unwrap();
        s.get_prop_string(-1, "out").unwrap();
        assert_eq!(s.get_string(-1).as_deref(), Some("core/view"));
        assert_eq!(s.module_count(), 3);
    }

    #[test]
    fn test_shared_dependency_runs_once() {
        let mut s = session_with(
            MemoryResolver::default()
                .with_module("shared.mjs", "hits = hits + 1; export let id = 'shared';")
                .with_module("one.mjs", "import { id } from './shared.mjs'; export let a = id;")
                .with_module("two.mjs", "import { id } from './shared.mjs'; export let b = id;"),
        );
        s.push_int(0);
        s.put_global_string("hits").unwrap();
        eval_main(&mut s, "import './one.mjs'; import './two.mjs';").unwrap();
        s.push_string("import './shared.mjs';");
        s.eval_module("again.mjs").unwrap();
        s.get_global_string("hits").unwrap();
        assert_eq!(s.get_int(-1), 1);
        assert_eq!(s.module_count(), 5);
    }

    #[test]
    fn test_cycle_through_namespaces() {
        let mut s = session_with(
            MemoryResolver::default()
                .with_module(
                    "a.mjs",
                    "import * as b from './b.mjs'; export function partner() { return b.name; } export let name = 'a';",
                )
                .with_module(
                    "b.mjs",
                    "import * as a from './a.mjs'; export function partner() { return a.name; } export let name = 'b';",
                ),
        );
        eval_main(
            &mut s,
            "import * as a from './a.mjs'; export let pair = a.name + a.partner();",
        )
        .unwrap();
        s.get_prop_string(-1, "pair").unwrap();
        assert_eq!(s.get_string(-1).as_deref(), Some("ab"));
    }

    #[test]
    fn test_cached_root_is_not_parsed_again() {
        let mut s = session_with(MemoryResolver::default());
        eval_main(&mut s, "export let first = 1;").unwrap();
        s.pop(1).unwrap();
        eval_main(&mut s, "this is not even valid").unwrap();
        s.get_prop_string(-1, "first").unwrap();
        assert_eq!(s.get_int(-1), 1);
    }
}

// ============================================================================
// Job queue
// ============================================================================

mod job_tests {
    use super::*;

    #[test]
    fn test_load_module_defers_until_drain() {
        let mut s = session_with(MemoryResolver::default().with_module("task.mjs", "ran = true;"));
        let id = s.load_module("./task.mjs").unwrap();
        assert!(s.is_busy());
        assert_eq!(s.pending_jobs(), 1);
        assert!(!s.get_global_string("ran").unwrap());
        s.pop(1).unwrap();
        assert_eq!(s.drain_jobs(), 2);
        assert!(!s.is_busy());
        assert!(s.get_global_string("ran").unwrap());
        assert_eq!(s.load_module("./task.mjs").unwrap(), id);
    }

    #[test]
    fn test_one_drain_loads_the_whole_graph() {
        let mut s = session_with(
            MemoryResolver::default()
                .with_module("a.mjs", "import { b } from './b.mjs'; seen = b;")
                .with_module("b.mjs", "export let b = 'from b';"),
        );
        let first = s.load_module("./a.mjs").unwrap();
        assert_eq!(s.load_module("./a.mjs").unwrap(), first);
        assert_eq!(s.pending_jobs(), 1);
        s.set_top(0);
        assert_eq!(s.drain_jobs(), 3);
        assert_eq!(s.module_count(), 2);
        s.get_global_string("seen").unwrap();
        assert_eq!(s.get_string(-1).as_deref(), Some("from b"));
    }

    #[test]
    fn test_drain_on_empty_queue() {
        let mut s = session_with(MemoryResolver::default());
        assert_eq!(s.drain_jobs(), 0);
    }
}

// ============================================================================
// Dynamic import
// ============================================================================

mod dynamic_tests {
    use super::*;

    #[test]
    fn test_dynamic_import_from_script() {
        let mut s = session_with(MemoryResolver::default().with_module("lazy.mjs", "export let value = 'loaded';"));
        s.push_eval("let m = import('./lazy.mjs'); m.value").unwrap();
        assert_eq!(s.get_string(-1).as_deref(), Some("loaded"));
        assert!(!s.is_busy());
    }

    #[test]
    fn test_dynamic_import_of_missing_module_throws() {
        let mut s = session_with(MemoryResolver::default());
        let e = s.push_eval("import('./nowhere.mjs')").unwrap_err();
        assert!(e.message().contains("nowhere.mjs"));
        assert_eq!(s.get_top(), 0);
    }

    #[test]
    fn test_repeated_missing_import_reuses_its_record() {
        let mut s = session_with(MemoryResolver::default());
        let first = s.push_eval("import('./nowhere.mjs')").unwrap_err();
        for _ in 0..48 {
            assert!(s.push_eval("import('./nowhere.mjs')").is_err());
        }
        let last = s.push_eval("import('./nowhere.mjs')").unwrap_err();
        assert_eq!(first.raw(), last.raw());
        assert_eq!(s.failed_module_count(), 1);
        assert_eq!(s.module_count(), 0);

        let loaded = s.load_module("./nowhere.mjs").unwrap_err();
        assert_eq!(loaded.raw(), first.raw());
        assert_eq!(loaded.kind(), ErrorKind::ModuleResolution);
        assert_eq!(s.failed_module_count(), 1);
    }

    #[test]
    fn test_dynamic_import_of_failed_module_rethrows() {
        let mut s = session_with(
            MemoryResolver::default().with_module("bad.mjs", "throw new Error('bad module');"),
        );
        let first = s.push_eval("import('./bad.mjs')").unwrap_err();
        let second = s.push_eval("import('./bad.mjs')").unwrap_err();
        assert_eq!(first.message(), "Error: bad module");
        assert_eq!(second.message(), "Error: bad module");
    }
}

// ============================================================================
// Failures
// ============================================================================

mod failure_tests {
    use super::*;

    #[test]
    fn test_missing_dependency() {
        let mut s = session_with(MemoryResolver::default());
        let e = eval_main(&mut s, "import { x } from './missing.mjs';").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::ModuleResolution);
        assert!(e.message().contains("missing.mjs"));
        assert_eq!(s.get_top(), 0);
    }

    #[test]
    fn test_syntax_error_in_root() {
        let mut s = session_with(MemoryResolver::default());
        let e = eval_main(&mut s, "export let = ;").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Compile);
        assert!(!s.is_busy());
        assert!(s.module_error("main.mjs").is_some());
    }

    #[test]
    fn test_syntax_error_in_dependency() {
        let mut s = session_with(MemoryResolver::default().with_module("broken.mjs", "export function ("));
        let e = eval_main(&mut s, "import './broken.mjs';").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Compile);
        assert!(e.message().starts_with("SyntaxError"));
        assert!(s.module_error("broken.mjs").is_some());
    }

    #[test]
    fn test_runtime_error_in_dependency_sticks() {
        let mut s = session_with(
            MemoryResolver::default().with_module("explode.mjs", "throw new TypeError('kaboom');"),
        );
        let e = eval_main(&mut s, "import './explode.mjs'; export let never = 1;").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Script);
        assert_eq!(e.message(), "TypeError: kaboom");
        s.push_string("import './explode.mjs';");
        let again = s.eval_module("other.mjs").unwrap_err();
        assert_eq!(again.message(), "TypeError: kaboom");
    }

    #[test]
    fn test_missing_named_export() {
        let mut s = session_with(MemoryResolver::default().with_module("lib.mjs", "export let a = 1;"));
        let e = eval_main(&mut s, "import { b } from './lib.mjs';").unwrap_err();
        assert!(e.message().contains("no export named 'b'"));
    }

    #[test]
    fn test_try_eval_module_leaves_error() {
        let mut s = session_with(MemoryResolver::default());
        s.push_string("import './gone.mjs';");
        assert!(!s.try_eval_module("main.mjs"));
        assert_eq!(s.get_top(), 1);
        assert!(s.is_error(-1));
    }
}

// ============================================================================
// Filesystem resolver
// ============================================================================

mod fs_tests {
    use super::*;

    fn fs_session(root: &std::path::Path) -> Session {
        let mut s = Session::new(Rc::new(SandboxEngine::new()));
        s.set_resolver(FsResolver::new(root, &ModulesConfig::default()));
        s
    }

    #[test]
    fn test_loads_relative_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("util.mjs"), "export let greeting = 'hello';").unwrap();
        let mut s = fs_session(dir.path());
        eval_main(&mut s, "import { greeting } from './util'; export let out = greeting;").unwrap();
        s.get_prop_string(-1, "out").unwrap();
        assert_eq!(s.get_string(-1).as_deref(), Some("hello"));
    }

    #[test]
    fn test_directory_index_and_lib_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("widgets")).unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("widgets/index.mjs"), "export let kind = 'widget';").unwrap();
        fs::write(dir.path().join("lib/strings.js"), "export function upper(s) { return s + '!'; }").unwrap();
        let mut s = fs_session(dir.path());
        eval_main(
            &mut s,
            "import { kind } from './widgets'; import { upper } from 'strings'; export let out = upper(kind);",
        )
        .unwrap();
        s.get_prop_string(-1, "out").unwrap();
        assert_eq!(s.get_string(-1).as_deref(), Some("widget!"));
    }

    #[test]
    fn test_missing_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = fs_session(dir.path());
        let e = eval_main(&mut s, "import './absent.mjs';").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::ModuleResolution);
    }
}
