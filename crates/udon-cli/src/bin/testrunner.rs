//! Golden-file test harness: `testrunner [dir]`.

use std::{env, fs, path::Path, process::ExitCode};

use udon_cli::{init_tracing, testrunner};

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().collect();
    let default_dir = "scripts/testsuite".to_owned();
    let test_dir = args.get(1).unwrap_or(&default_dir);

    println!("udon test runner");
    println!("================");
    println!("Test directory: {test_dir}");
    println!();

    let summary = match testrunner::run_suite(Path::new(test_dir), |test, result| {
        match result {
            testrunner::TestResult::Pass => println!("[PASS] {}", test.name),
            testrunner::TestResult::Fail(_) => println!("[FAIL] {}", test.name),
        }
    }) {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("Error: could not read test directory '{test_dir}': {err}");
            return ExitCode::FAILURE;
        }
    };

    if summary.total() == 0 {
        eprintln!("No test files found in {test_dir}");
        return ExitCode::FAILURE;
    }

    println!();
    println!("================");
    println!(
        "Results: {} passed, {} failed out of {} tests",
        summary.passed,
        summary.failed,
        summary.total()
    );
    if !summary.failed_names.is_empty() {
        println!();
        println!("Failed tests:");
        for name in &summary.failed_names {
            println!("  - {name}");
        }
        println!();
        println!("See tmp/testsuite.report for details");
    }

    let _ = fs::create_dir_all("tmp");
    if let Err(err) = fs::write("tmp/testsuite.report", &summary.report) {
        eprintln!("Warning: could not write tmp/testsuite.report: {err}");
    }

    if summary.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
