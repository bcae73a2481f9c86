/// Benchmark runner for the host layer.
///
/// Times stack churn, native dispatch, script calls and module loading on the
/// sandbox engine.

extern crate jshost;

use std::rc::Rc;
use std::time::{Duration, Instant};

use jshost::engine::sandbox::SandboxEngine;
use jshost::runner::ds::error::JsResult;
use jshost::runner::module::resolver::MemoryResolver;
use jshost::runner::plugin::types::{CallInfo, NativeFunction};
use jshost::runner::session::Session;

fn session() -> Session {
    Session::new(Rc::new(SandboxEngine::new()))
}

fn native_add(session: &mut Session, _info: &CallInfo) -> JsResult<bool> {
    let sum = session.require_number(0)? + session.require_number(1)?;
    session.push_number(sum);
    Ok(true)
}

/// Run a benchmark body `iterations` times on a fresh session each time.
fn run_benchmark(iterations: u32, body: &dyn Fn(&mut Session)) -> Duration {
    let start = Instant::now();
    for _ in 0..iterations {
        let mut s = session();
        body(&mut s);
    }
    start.elapsed()
}

// ============================================================================
// Benchmark definitions
// ============================================================================

fn bench_stack_churn(s: &mut Session) {
    for i in 0..1000 {
        s.push_int(i);
        s.push_string("slot");
        s.push_object();
        let _ = s.dup(-3);
        let _ = s.pop(4);
    }
}

fn bench_property_access(s: &mut Session) {
    s.push_object();
    for i in 0..500u32 {
        s.push_uint(i);
        let _ = s.put_prop_index(0, i);
    }
    for i in 0..500u32 {
        let _ = s.get_prop_index(0, i);
        let _ = s.pop(1);
    }
}

fn bench_native_dispatch(s: &mut Session) {
    let _ = s.register_global(NativeFunction::new("add", native_add).with_min_args(2));
    let _ = s.push_eval("function loop(n) { if (n === 0) { return 0; } return add(1, loop(n - 1)); }");
    let _ = s.pop(1);
    let _ = s.push_eval("loop(100)");
}

fn bench_script_calls(s: &mut Session) {
    let _ = s.push_eval("function id(x) { return x; }");
    let _ = s.pop(1);
    for i in 0..200 {
        let _ = s.get_global_string("id");
        s.push_int(i);
        let _ = s.call(1);
        let _ = s.pop(1);
    }
}

fn bench_module_graph(s: &mut Session) {
    let mut resolver = MemoryResolver::default();
    for i in 0..20 {
        let source = if i == 0 {
            "export let value = 1;".to_string()
        } else {
            format!(
                "import * as prev from './m{}.mjs'; export let value = prev.value + 1;",
                i - 1
            )
        };
        resolver.insert(&format!("m{}.mjs", i), &source);
    }
    let imports: String = (0..20)
        .map(|i| format!("import * as m{} from './m{}.mjs';\n", i, i))
        .collect();
    s.set_resolver(resolver);
    s.push_string(&imports);
    let _ = s.eval_module("main.mjs");
}

fn main() {
    println!("=======================================================");
    println!("  jshost Host Layer Benchmarks");
    println!("=======================================================\n");

    let benchmarks: Vec<(&str, &dyn Fn(&mut Session), u32)> = vec![
        ("Stack churn (1K)", &bench_stack_churn, 200),
        ("Property access (500)", &bench_property_access, 100),
        ("Native dispatch (100 deep)", &bench_native_dispatch, 100),
        ("Script calls (200)", &bench_script_calls, 100),
        ("Module graph (20 modules)", &bench_module_graph, 50),
    ];

    println!("{:<30} {:>14} {:>14}", "Benchmark", "Total", "Per iteration");
    println!("{}", "-".repeat(60));

    let mut total = Duration::ZERO;
    for (name, body, iterations) in &benchmarks {
        let elapsed = run_benchmark(*iterations, *body);
        total += elapsed;
        println!(
            "{:<30} {:>12.2?} {:>12.2?}",
            name,
            elapsed,
            elapsed / *iterations
        );
    }

    println!("{}", "-".repeat(60));
    println!("{:<30} {:>12.2?}", "TOTAL", total);

    // Verify correctness
    println!("\n=======================================================");
    println!("  Correctness Verification");
    println!("=======================================================\n");

    let mut s = session();
    bench_native_dispatch(&mut s);
    let dispatch = s.get_number(-1);
    let status = if dispatch == 100.0 { "✓" } else { "✗" };
    println!("{:<30} {:>12} {:>4} {:>7}", "Native dispatch", 100, status, dispatch);

    let mut s = session();
    bench_stack_churn(&mut s);
    let status = if s.get_top() == 0 { "✓" } else { "✗" };
    println!("{:<30} {:>12} {:>4} {:>7}", "Stack depth after churn", 0, status, s.get_top());

    let mut s = session();
    bench_module_graph(&mut s);
    let status = if s.module_count() == 21 { "✓" } else { "✗" };
    println!("{:<30} {:>12} {:>4} {:>7}", "Cached modules", 21, status, s.module_count());
}
