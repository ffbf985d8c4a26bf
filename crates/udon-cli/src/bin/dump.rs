//! Bytecode disassembler: `dump <script> [--lowered]`.

use std::{env, path::Path, process::ExitCode};

use udon::Interpreter;
use udon_cli::{format_error, init_tracing, load_file};

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: dump <script.udon> [--lowered]");
        return ExitCode::FAILURE;
    }
    let script_file = &args[1];
    let lowered = args.iter().any(|a| a == "--lowered");

    let source = match load_file(Path::new(script_file)) {
        Ok(source) => source,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::FAILURE;
        }
    };

    let mut interp = Interpreter::new();
    if let Err(err) = interp.compile(&source) {
        eprintln!("{}", format_error(&err));
        return ExitCode::FAILURE;
    }

    print!("{}", interp.dump_instructions());
    if lowered {
        print!("{}", interp.dump_lowered());
    }
    ExitCode::SUCCESS
}
