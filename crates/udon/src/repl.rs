//! Interactive session logic shared by REPL front-ends.
//!
//! Handles multi-line continuation (unbalanced braces, open `function`
//! declarations), routes function definitions through `compile_append`, and
//! wraps any other input in a synthetic zero-argument function so
//! statements and expressions can run directly.

use crate::{
    error::UdonResult,
    interp::Interpreter,
    value::Value,
};

/// Result of feeding one line into the session.
#[derive(Debug, PartialEq)]
pub enum ReplOutcome {
    /// Input so far is incomplete; prompt for another line.
    Incomplete,
    /// Nothing to do (blank input).
    Empty,
    /// One or more definitions were compiled into the session.
    Defined,
    /// An expression or statement ran, producing this value.
    Value(Value),
}

/// A persistent interactive session around one interpreter.
pub struct ReplSession {
    interp: Interpreter,
    pending: String,
    brace_depth: i32,
    in_function: bool,
    saw_brace: bool,
    eval_counter: u32,
}

impl Default for ReplSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplSession {
    #[must_use]
    pub fn new() -> Self {
        Self::with_interpreter(Interpreter::new())
    }

    #[must_use]
    pub fn with_interpreter(interp: Interpreter) -> Self {
        Self {
            interp,
            pending: String::new(),
            brace_depth: 0,
            in_function: false,
            saw_brace: false,
            eval_counter: 0,
        }
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        &mut self.interp
    }

    /// True when the session is waiting for more lines.
    #[must_use]
    pub fn is_continuing(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drops any accumulated partial input.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
        self.brace_depth = 0;
        self.in_function = false;
        self.saw_brace = false;
    }

    /// Feeds one line. Errors leave the session usable; partial input is
    /// discarded so the next line starts fresh.
    pub fn feed(&mut self, line: &str) -> UdonResult<ReplOutcome> {
        let line = line.trim();
        if line.is_empty() && self.pending.is_empty() {
            return Ok(ReplOutcome::Empty);
        }

        if !self.pending.is_empty() {
            self.pending.push('\n');
        }
        self.pending.push_str(line);

        for c in line.chars() {
            match c {
                '{' => {
                    self.brace_depth += 1;
                    self.saw_brace = true;
                }
                '}' => self.brace_depth -= 1,
                _ => {}
            }
        }
        if line.starts_with("function") {
            self.in_function = true;
        }

        // A function declaration stays open until its body braces have
        // appeared and balanced out.
        if self.brace_depth > 0 || (self.in_function && !self.saw_brace) {
            return Ok(ReplOutcome::Incomplete);
        }

        let code = std::mem::take(&mut self.pending);
        self.clear_pending();

        let result = if contains_function_keyword(&code) {
            self.interp.compile_append(&code).map(|()| ReplOutcome::Defined)
        } else {
            let name = format!("__repl_eval_{}", self.eval_counter);
            self.eval_counter += 1;
            let wrapped = format!("function {name}() {{\n{code}\n}}");
            self.interp
                .compile_append(&wrapped)
                .and_then(|()| self.interp.run(&name, vec![]))
                .map(ReplOutcome::Value)
        };
        result
    }
}

/// Whether the input defines functions (word-boundary match on `function`).
fn contains_function_keyword(code: &str) -> bool {
    let bytes = code.as_bytes();
    let mut search_from = 0;
    while let Some(found) = code[search_from..].find("function") {
        let at = search_from + found;
        let boundary_before = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
        let after = at + "function".len();
        let boundary_after = after >= bytes.len() || !bytes[after].is_ascii_alphanumeric();
        if boundary_before && boundary_after {
            return true;
        }
        search_from = at + 1;
    }
    false
}
