//! Lambda-calculus compiler CLI.
//!
//! Provides the `lamc` binary. With a file argument it compiles (and, when
//! built with the `jit` feature, evaluates) that file; without one it runs
//! an interactive line-oriented session: prompt, read one expression,
//! compile, report, repeat. Parse errors flagged fatal (an exhausted input
//! stream) end the session; every other error reports and skips to the
//! next prompt.
//!
//! The intermediate dumps behind the `--dump-*` flags expose each pass's
//! output in its canonical textual rendering; `RUST_LOG=debug` traces the
//! same information through `tracing` instead.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lamc_core::closure::closure_convert;
use lamc_core::hoist::{hoist, Function};
use lamc_core::normalize::convert_defunc;
use lamc_core::parser::parse;
use lamc_core::rename::alpha_rename;

/// Lambda-calculus compiler and interactive session.
#[derive(Parser)]
#[command(name = "lamc", about = "Lambda calculus compiler with an LLVM JIT backend")]
struct Cli {
    /// Source file to compile; starts an interactive session when omitted.
    file: Option<PathBuf>,

    /// Print the parsed expression.
    #[arg(long)]
    dump_ast: bool,

    /// Print the expression after ANF conversion.
    #[arg(long)]
    dump_anf: bool,

    /// Print the closure-converted expression.
    #[arg(long)]
    dump_closure: bool,

    /// Print the hoisted functions.
    #[arg(long)]
    dump_blocks: bool,

    /// Optimization level: O0, O1, O2, O3 (used by the JIT build).
    #[arg(short = 'O', long, default_value = "O0")]
    opt_level: String,
}

/// What became of one line (or file) of input.
enum Outcome {
    Done,
    Failed,
    /// The input stream is unusable; the session should end.
    FatalParse,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match &cli.file {
        Some(path) => match fs::read_to_string(path) {
            Ok(source) => match process_source(&source, &cli) {
                Outcome::Done => 0,
                Outcome::Failed | Outcome::FatalParse => 1,
            },
            Err(err) => {
                eprintln!("error: failed to read {}: {}", path.display(), err);
                3
            }
        },
        None => repl(&cli),
    };
    process::exit(code);
}

fn repl(cli: &Cli) -> i32 {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return 0;
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("error: failed to read input: {}", err);
                return 1;
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        if let Outcome::FatalParse = process_source(line.trim(), cli) {
            return 1;
        }
    }
}

/// Runs one expression through the whole pipeline.
fn process_source(source: &str, cli: &Cli) -> Outcome {
    let mut exp = match parse(source) {
        Ok(exp) => exp,
        Err(err) => {
            eprintln!("parse error: {}", err);
            return if err.fatal {
                Outcome::FatalParse
            } else {
                Outcome::Failed
            };
        }
    };
    if cli.dump_ast {
        println!("{}", exp);
    }
    debug!(ast = %exp, "parsed");

    if let Err(err) = alpha_rename(&mut exp) {
        eprintln!("error: {}", err);
        return Outcome::Failed;
    }
    debug!(renamed = %exp, "alpha-renamed");

    let anf = match convert_defunc(exp) {
        Ok(anf) => anf,
        Err(err) => {
            eprintln!("error: {}", err);
            return Outcome::Failed;
        }
    };
    if cli.dump_anf {
        println!("{}", anf);
    }
    debug!(anf = %anf, "converted to ANF");

    let converted = closure_convert(anf);
    if cli.dump_closure {
        println!("{}", converted);
    }
    debug!(closure = %converted, "closure-converted");

    let functions = hoist(converted);
    if cli.dump_blocks {
        for function in &functions {
            println!("{}\n", function);
        }
    }

    if run_functions(&functions, cli) {
        Outcome::Done
    } else {
        Outcome::Failed
    }
}

#[cfg(feature = "jit")]
fn run_functions(functions: &[Function], cli: &Cli) -> bool {
    let opt_level = match parse_opt_level(&cli.opt_level) {
        Ok(level) => level,
        Err(message) => {
            eprintln!("error: {}", message);
            return false;
        }
    };
    match lamc_codegen::evaluate(functions, opt_level) {
        Ok(result) => {
            println!("Evaluated to: {}", result);
            true
        }
        Err(err) => {
            eprintln!("error: {}", err);
            false
        }
    }
}

#[cfg(feature = "jit")]
fn parse_opt_level(level: &str) -> Result<lamc_codegen::OptLevel, String> {
    match level {
        "O0" | "o0" => Ok(lamc_codegen::OptLevel::O0),
        "O1" | "o1" => Ok(lamc_codegen::OptLevel::O1),
        "O2" | "o2" => Ok(lamc_codegen::OptLevel::O2),
        "O3" | "o3" => Ok(lamc_codegen::OptLevel::O3),
        _ => Err(format!(
            "invalid optimization level '{}', expected O0/O1/O2/O3",
            level
        )),
    }
}

#[cfg(not(feature = "jit"))]
fn run_functions(functions: &[Function], cli: &Cli) -> bool {
    debug!(opt_level = %cli.opt_level, "built without jit; printing compiled functions");
    if !cli.dump_blocks {
        for function in functions {
            println!("{}\n", function);
        }
    }
    true
}
