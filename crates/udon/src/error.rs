//! Error type shared by every stage of the pipeline.
//!
//! All stages (lexing, compilation, lowering, execution, host builtins)
//! produce the same error record carrying a source location. There is no
//! in-script recovery: an error unwinds to the outermost `run` call and the
//! host decides what to do with it.

use std::fmt;

use strum::IntoStaticStr;

/// Result alias used throughout the interpreter.
pub type UdonResult<T> = Result<T, UdonError>;

/// Which stage of the pipeline produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, serde::Serialize)]
pub enum ErrorKind {
    /// Tokenizer failures (unterminated string, malformed number).
    Lex,
    /// Parser failures (unexpected token, missing delimiter).
    Parse,
    /// Semantic compile-time failures (undeclared variable, bad `break`).
    Compile,
    /// Stack-to-register translation failures. These indicate a compiler bug.
    Lower,
    /// Failures raised while executing lowered code.
    Runtime,
    /// Errors returned by a host builtin, propagated unchanged.
    Host,
}

/// An error with a 1-based source location.
///
/// A zero line means "location not yet known"; the VM fills in the location
/// of the current instruction before propagating such errors.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UdonError {
    pub kind: ErrorKind,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl UdonError {
    #[must_use]
    pub fn new(kind: ErrorKind, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            column,
            message: message.into(),
        }
    }

    /// A runtime error with no location attached yet.
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, 0, 0, message)
    }

    /// A host/builtin error with no location attached yet.
    #[must_use]
    pub fn host(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Host, 0, 0, message)
    }

    /// Attaches a location unless one is already present.
    #[must_use]
    pub(crate) fn or_location(mut self, line: u32, column: u32) -> Self {
        if self.line == 0 {
            self.line = line;
            self.column = column;
        }
        self
    }

    /// Returns true when the error carries a usable source location.
    #[must_use]
    pub fn has_location(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for UdonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_location() {
            write!(f, "{} at line {}, column {}", self.message, self.line, self.column)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for UdonError {}
