//! Script runner: `us <script> [entry]`.

use std::{env, path::Path, process::ExitCode};

use udon::{Interpreter, Value};
use udon_cli::{format_error, init_tracing, load_file};

fn print_usage(program: &str) {
    eprintln!("udon script runner");
    eprintln!("Usage: {program} <script_file> [entry_function]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  script_file      Path to the .udon script file to execute");
    eprintln!("  entry_function   Function to call (default: main)");
}

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return ExitCode::FAILURE;
    }
    let script_file = &args[1];
    let entry = args.get(2).map_or("main", String::as_str);

    let source = match load_file(Path::new(script_file)) {
        Ok(source) => source,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::FAILURE;
        }
    };

    let mut interp = Interpreter::new();
    if let Err(err) = interp.compile(&source) {
        eprintln!("Compilation error in '{script_file}'");
        eprintln!("{}", format_error(&err));
        return ExitCode::FAILURE;
    }

    match interp.run(entry, vec![]) {
        Ok(Value::None) => ExitCode::SUCCESS,
        Ok(value) => {
            println!("Return value: {}", interp.display_value(&value));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Runtime error in '{script_file}'");
            eprintln!("{}", format_error(&err));
            ExitCode::FAILURE
        }
    }
}
