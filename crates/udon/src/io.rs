//! Output sinks for the `print`/`puts` builtins.
//!
//! The interpreter never writes to stdout directly; everything goes through
//! a [`PrintWriter`] so hosts, the REPL and the test harness can capture or
//! redirect script output.

use std::{
    cell::RefCell,
    io::{self, Write as _},
    rc::Rc,
};

/// Sink for script output. `text` arrives exactly as the script produced
/// it, including any trailing newline added by `print`.
pub trait PrintWriter {
    fn write(&mut self, text: &str);
}

/// Default writer: line-buffered stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Writer that appends into a shared string buffer.
///
/// Used by tests and the testrunner to capture stdout; keep the handle from
/// [`CollectPrint::handle`] to read what was written.
#[derive(Debug, Default)]
pub struct CollectPrint {
    buffer: Rc<RefCell<String>>,
}

impl CollectPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle onto the captured output.
    #[must_use]
    pub fn handle(&self) -> Rc<RefCell<String>> {
        Rc::clone(&self.buffer)
    }
}

impl PrintWriter for CollectPrint {
    fn write(&mut self, text: &str) {
        self.buffer.borrow_mut().push_str(text);
    }
}
