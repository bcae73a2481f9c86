//! Command-line runner for the host layer on the sandbox engine.
//!
//! Usage:
//!   jshost [--config <file>] <file.mjs>     # Evaluate a module file
//!   jshost [--config <file>] -e "code"      # Evaluate a script
//!   jshost [--config <file>]                # Start REPL (interactive mode)

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::rc::Rc;

use jshost::engine::sandbox::SandboxEngine;
use jshost::runner::ds::error::Exception;
use jshost::runner::module::resolver::FsResolver;
use jshost::runner::plugin::config::HostConfig;
use jshost::runner::session::Session;
use jshost::runner::std_lib::register_std_lib;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config = match take_config(&mut args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{}", message);
            process::exit(1);
        }
    };

    match args.len() {
        0 => run_repl(config),
        1 => {
            let arg = &args[0];
            if arg == "-h" || arg == "--help" {
                print_usage();
                process::exit(0);
            }
            run_file(config, arg);
        }
        2 if args[0] == "-e" || args[0] == "--eval" => eval_code(config, &args[1]),
        _ => {
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("jshost - script engine host");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  jshost [--config <file>] <file.mjs>   Evaluate a module file");
    eprintln!("  jshost [--config <file>] -e \"code\"    Evaluate a script");
    eprintln!("  jshost [--config <file>]              Start REPL (interactive mode)");
}

/// Pulls `--config <path>` out of the arguments and loads it.
fn take_config(args: &mut Vec<String>) -> Result<HostConfig, String> {
    let at = match args.iter().position(|a| a == "--config") {
        Some(at) => at,
        None => return Ok(HostConfig::default()),
    };
    if at + 1 >= args.len() {
        return Err("--config needs a file argument".to_string());
    }
    let path = args.remove(at + 1);
    args.remove(at);
    HostConfig::load(Path::new(&path)).map_err(|e| e.to_string())
}

fn new_session(config: HostConfig) -> Session {
    let mut session = Session::with_config(Rc::new(SandboxEngine::new()), config);
    if let Err(e) = register_std_lib(&mut session) {
        report(&e);
        process::exit(1);
    }
    session
}

fn report(e: &Exception) {
    eprintln!("{} error: {}", e.kind(), e);
}

fn run_file(config: HostConfig, filename: &str) {
    let path = Path::new(filename);
    let source = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", filename, e);
            process::exit(1);
        }
    };
    let root = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());

    let resolver = FsResolver::new(root, &config.modules);
    let mut session = new_session(config);
    session.set_resolver(resolver);
    session.push_string(&source);
    if let Err(e) = session.eval_module(&name) {
        report(&e);
        process::exit(1);
    }
}

fn eval_code(config: HostConfig, code: &str) {
    let mut session = new_session(config);
    match session.eval_script(code, "eval") {
        Ok(()) => print_top(&mut session),
        Err(e) => {
            report(&e);
            process::exit(1);
        }
    }
}

/// Prints and pops the top value unless it is `undefined`.
fn print_top(session: &mut Session) {
    if !session.is_undefined(-1) {
        if session.is_string(-1) {
            println!("{}", session.get_string(-1).unwrap_or_default());
        } else if let Ok(text) = session.to_string(-1) {
            println!("{}", text);
        }
    }
    let _ = session.pop(1);
}

fn run_repl(config: HostConfig) {
    println!("jshost v{} - script engine host", env!("CARGO_PKG_VERSION"));
    println!("Type code and press Enter. Type .exit to quit.");
    println!();

    let mut session = new_session(config);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line_number = 0;

    loop {
        print!("> ");
        let _ = stdout.flush();

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }

        let input = input.trim();
        if input == ".exit" || input == ".quit" {
            break;
        }
        if input == ".gc" {
            println!("freed {} values", session.gc());
            continue;
        }
        if input.is_empty() {
            continue;
        }

        line_number += 1;
        match session.eval_script(input, &format!("repl:{}", line_number)) {
            Ok(()) => print_top(&mut session),
            Err(e) => report(&e),
        }
    }

    println!("Goodbye!");
}
