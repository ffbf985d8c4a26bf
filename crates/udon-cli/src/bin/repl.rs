//! Interactive prompt: `repl`.

use std::process::ExitCode;

use rustyline::{DefaultEditor, error::ReadlineError};
use udon::{ReplOutcome, ReplSession, Value};
use udon_cli::{format_error, init_tracing};

const HELP: &str = "\
Commands:
  exit, quit - Exit the REPL
  help       - Show this help
  clear      - Clear accumulated input

Usage:
  - Enter expressions or statements to run them
  - Define functions that persist for the session
  - Multi-line input supported (unbalanced braces continue)

Note: local variables don't persist between statements.
      Use functions or globals to keep state.";

fn main() -> ExitCode {
    init_tracing();
    println!("udon repl");
    println!("Type 'exit' or 'quit' to exit, 'help' for help");
    println!();

    let Ok(mut editor) = DefaultEditor::new() else {
        eprintln!("Error: could not initialize line editor");
        return ExitCode::FAILURE;
    };
    let mut session = ReplSession::new();

    loop {
        let prompt = if session.is_continuing() { "... " } else { ">>> " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                session.clear_pending();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        };
        let _ = editor.add_history_entry(line.as_str());
        let trimmed = line.trim();

        if !session.is_continuing() {
            match trimmed {
                "exit" | "quit" => {
                    println!("Goodbye!");
                    break;
                }
                "help" => {
                    println!("{HELP}");
                    continue;
                }
                "clear" => {
                    session.clear_pending();
                    println!("Input cleared.");
                    continue;
                }
                _ => {}
            }
        }

        match session.feed(&line) {
            Ok(ReplOutcome::Value(Value::None) | ReplOutcome::Empty | ReplOutcome::Incomplete) => {}
            Ok(ReplOutcome::Defined) => println!("OK"),
            Ok(ReplOutcome::Value(value)) => {
                let text = session.interpreter().display_value(&value);
                println!("{text}");
            }
            Err(err) => println!("{}", format_error(&err)),
        }
    }
    ExitCode::SUCCESS
}
