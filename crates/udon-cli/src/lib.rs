//! Shared plumbing for the command-line front-ends: file loading, error
//! formatting, tracing setup and the golden-file test harness used by the
//! `testrunner` binary.

pub mod testrunner;

use std::{fs, path::Path};

use udon::UdonError;

/// Reads a script file, mapping I/O failures to a printable message.
pub fn load_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Could not read file '{}': {e}", path.display()))
}

/// Renders an error the way every front-end prints it.
#[must_use]
pub fn format_error(err: &UdonError) -> String {
    if err.has_location() {
        format!("Error: {}\n  at line {}, column {}", err.message, err.line, err.column)
    } else {
        format!("Error: {}", err.message)
    }
}

/// Installs the tracing subscriber, honoring `RUST_LOG`; diagnostics go to
/// stderr so script output on stdout stays clean.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
