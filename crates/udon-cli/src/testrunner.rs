//! Golden-file test harness.
//!
//! For every `*.udon` file in a directory (sorted by name): compile, run
//! `main` with captured stdout, trim trailing whitespace and compare
//! against the sibling `.expected` file. Tests named `fail_*` must produce
//! a compile or runtime error instead.

use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use udon::{CollectPrint, Interpreter};

/// One discovered test.
#[derive(Debug)]
pub struct TestCase {
    pub name: String,
    pub script_path: PathBuf,
    pub expected: Option<String>,
    pub should_fail: bool,
}

/// Result of one test run.
#[derive(Debug)]
pub enum TestResult {
    Pass,
    /// Mismatch or unexpected error; the string goes into the report.
    Fail(String),
}

/// Aggregate outcome of a suite run.
#[derive(Debug, Default)]
pub struct TestSummary {
    pub passed: usize,
    pub failed: usize,
    pub failed_names: Vec<String>,
    /// Report body written to `tmp/testsuite.report`.
    pub report: String,
}

impl TestSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

fn trim_trailing(mut text: String) -> String {
    while text.ends_with(['\n', '\r', ' ']) {
        text.pop();
    }
    text
}

/// Discovers test cases in a directory, sorted by file name.
pub fn discover(dir: &Path) -> std::io::Result<Vec<TestCase>> {
    let mut scripts: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "udon"))
        .collect();
    scripts.sort();

    let mut tests = Vec::with_capacity(scripts.len());
    for script_path in scripts {
        let name = script_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let expected_path = script_path.with_extension("expected");
        let expected = fs::read_to_string(&expected_path).ok().map(trim_trailing);
        let should_fail = name.starts_with("fail_");
        tests.push(TestCase {
            name,
            script_path,
            expected,
            should_fail,
        });
    }
    Ok(tests)
}

/// Runs one test in a fresh interpreter with captured stdout.
pub fn run_test(test: &TestCase) -> TestResult {
    let Ok(source) = fs::read_to_string(&test.script_path) else {
        return TestResult::Fail("Failed to load script".to_owned());
    };

    let mut interp = Interpreter::new();
    let writer = CollectPrint::new();
    let captured = writer.handle();
    interp.set_print(Rc::new(RefCell::new(writer)));

    let run_result = interp.compile(&source).and_then(|()| interp.run("main", vec![]));

    let actual = match run_result {
        Err(err) => {
            if test.should_fail {
                return match &test.expected {
                    None => TestResult::Pass,
                    Some(expected) => {
                        let tag = if err.kind == udon::ErrorKind::Runtime || err.kind == udon::ErrorKind::Host {
                            "RUNTIME_ERROR"
                        } else {
                            "COMPILE_ERROR"
                        };
                        if tag == expected {
                            TestResult::Pass
                        } else {
                            TestResult::Fail(format!("Expected:\n{expected}\n\nGot:\n{tag}"))
                        }
                    }
                };
            }
            return TestResult::Fail(format!("ERROR: {err}"));
        }
        Ok(_) => trim_trailing(captured.borrow().clone()),
    };

    if test.should_fail {
        return TestResult::Fail("Expected an error, but the script ran".to_owned());
    }
    match &test.expected {
        None => TestResult::Pass,
        Some(expected) if *expected == actual => TestResult::Pass,
        Some(expected) => TestResult::Fail(format!("Expected:\n{expected}\n\nGot:\n{actual}")),
    }
}

/// Runs the whole suite, invoking `progress` per test with the result.
pub fn run_suite(dir: &Path, mut progress: impl FnMut(&TestCase, &TestResult)) -> std::io::Result<TestSummary> {
    let tests = discover(dir)?;
    let mut summary = TestSummary::default();
    for test in &tests {
        let result = run_test(test);
        progress(test, &result);
        match &result {
            TestResult::Pass => summary.passed += 1,
            TestResult::Fail(detail) => {
                summary.failed += 1;
                summary.failed_names.push(test.name.clone());
                summary.report.push_str(&format!("=== {} ===\n{detail}\n\n", test.name));
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_suite_pass_fail_and_expected_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "hello.udon", "function main() { print(\"hi\") }");
        write_file(dir.path(), "hello.expected", "hi\n");
        write_file(dir.path(), "wrong.udon", "function main() { print(1) }");
        write_file(dir.path(), "wrong.expected", "2");
        write_file(dir.path(), "fail_syntax.udon", "function main() { if }");
        write_file(dir.path(), "fail_runtime.udon", "function main() { return missing() }");

        let summary = run_suite(dir.path(), |_, _| {}).unwrap();
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_names, vec!["wrong"]);
        assert!(summary.report.contains("=== wrong ==="));
    }

    #[test]
    fn test_fail_prefix_requires_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "fail_but_ok.udon", "function main() { return 1 }");
        let summary = run_suite(dir.path(), |_, _| {}).unwrap();
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_trailing_whitespace_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "pad.udon", "function main() { print(\"x\") }");
        write_file(dir.path(), "pad.expected", "x\n\n  \n");
        let summary = run_suite(dir.path(), |_, _| {}).unwrap();
        assert_eq!(summary.passed, 1);
    }
}
