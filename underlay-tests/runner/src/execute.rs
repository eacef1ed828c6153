// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use underlay_tests::underlay_testcase::{Framework, TestCase, TestOutcome};

use crate::config::RunOptions;
use crate::fixtures::TestFixtures;

/// Statistics returned after executing a set of tests.
pub struct ExecutionStats {
    /// The number of tests that passed.
    pub tests_passed: u32,

    /// The number of tests that failed.
    pub tests_failed: u32,

    /// The number of tests that marked themselves as skipped.
    pub tests_skipped: u32,

    /// The number of tests that the runner decided not to run (e.g. because of
    /// a failure in a fixture or an interrupt).
    pub tests_not_run: u32,

    /// The total time spent running tests and fixtures.
    pub duration: Duration,

    /// A collection of test cases that returned a failed result.
    pub failed_test_cases: Vec<&'static TestCase>,

    started_at: DateTime<Utc>,
    records: Vec<TestRecord>,
}

/// One test's entry in the results file.
#[derive(Debug, Serialize)]
struct TestRecord {
    name: String,
    id: String,
    outcome: &'static str,
    message: Option<String>,
    duration_secs: f64,
}

#[derive(Serialize)]
struct Report<'a> {
    started_at: DateTime<Utc>,
    duration_secs: f64,
    passed: u32,
    failed: u32,
    skipped: u32,
    not_run: u32,
    tests: &'a [TestRecord],
}

impl ExecutionStats {
    fn new(selected: usize) -> Self {
        Self {
            tests_passed: 0,
            tests_failed: 0,
            tests_skipped: 0,
            tests_not_run: selected as u32,
            duration: Duration::default(),
            failed_test_cases: Vec::new(),
            started_at: Utc::now(),
            records: Vec::new(),
        }
    }

    fn record(
        &mut self,
        tc: &'static TestCase,
        outcome: &TestOutcome,
        elapsed: Duration,
    ) {
        let (label, message) = match outcome {
            TestOutcome::Passed => {
                self.tests_passed += 1;
                ("passed", None)
            }
            TestOutcome::Failed(msg) => {
                self.tests_failed += 1;
                self.failed_test_cases.push(tc);
                ("failed", msg.clone())
            }
            TestOutcome::Skipped(msg) => {
                self.tests_skipped += 1;
                ("skipped", msg.clone())
            }
        };

        self.records.push(TestRecord {
            name: tc.fully_qualified_name(),
            id: tc.id().to_string(),
            outcome: label,
            message,
            duration_secs: elapsed.as_secs_f64(),
        });
    }

    /// Writes the run's results as JSON into `dir` and returns the file's
    /// path.
    pub fn write_report(&self, dir: &Utf8Path) -> anyhow::Result<Utf8PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating reports directory {dir}"))?;

        let path = dir.join(format!(
            "underlay-results-{}.json",
            self.started_at.format("%Y%m%dT%H%M%SZ")
        ));
        let report = Report {
            started_at: self.started_at,
            duration_secs: self.duration.as_secs_f64(),
            passed: self.tests_passed,
            failed: self.tests_failed,
            skipped: self.tests_skipped,
            not_run: self.tests_not_run,
            tests: &self.records,
        };
        let file = std::fs::File::create(&path)
            .with_context(|| format!("creating {path}"))?;
        serde_json::to_writer_pretty(file, &report)
            .with_context(|| format!("writing {path}"))?;
        Ok(path)
    }
}

/// Executes the selected tests one at a time against `framework`.
pub fn run_tests_with_framework(
    framework: &Framework,
    mut fixtures: TestFixtures<'_>,
    run_opts: &RunOptions,
) -> ExecutionStats {
    let executions: Vec<&'static TestCase> =
        underlay_tests::underlay_testcase::filtered_test_cases(
            &run_opts.include_filter,
            &run_opts.exclude_filter,
        )
        .collect();

    let mut stats = ExecutionStats::new(executions.len());
    if executions.is_empty() {
        info!("No tests selected for execution");
        return stats;
    }

    let interrupted = set_sigint_handler();
    install_panic_hook();
    info!("Running {} test(s)", executions.len());
    let start_time = Instant::now();

    if let Err(e) = fixtures.execution_setup() {
        error!("Error running execution setup fixture: {:#}", e);
        stats.duration = start_time.elapsed();
        return stats;
    }

    for tc in executions {
        // Tests can't be interrupted midway, so the flag is only checked
        // between them.
        if interrupted.load(Ordering::SeqCst) {
            info!("Test run interrupted by SIGINT");
            break;
        }

        info!("Starting test {}", tc.fully_qualified_name());

        // Failure to run a setup fixture is fatal to the rest of the run,
        // but it's still possible to report results.
        if let Err(e) = fixtures.test_setup() {
            error!("Error running test setup fixture: {:#}", e);
            break;
        }

        stats.tests_not_run -= 1;
        let test_start = Instant::now();
        let test_outcome = run_catching_panics(tc, framework);

        info!(
            "test {} ... {}{}",
            tc.fully_qualified_name(),
            match test_outcome {
                TestOutcome::Passed => "ok",
                TestOutcome::Failed(_) => "FAILED: ",
                TestOutcome::Skipped(_) => "skipped: ",
            },
            match &test_outcome {
                TestOutcome::Failed(Some(s))
                | TestOutcome::Skipped(Some(s)) => s,
                TestOutcome::Failed(None) | TestOutcome::Skipped(None) =>
                    "[no message]",
                _ => "",
            }
        );
        stats.record(tc, &test_outcome, test_start.elapsed());

        if let Err(e) = fixtures.test_cleanup() {
            error!("Error running cleanup fixture: {:#}", e);
            break;
        }
    }

    if let Err(e) = fixtures.execution_cleanup() {
        error!("Error running execution cleanup fixture: {:#}", e);
    }

    stats.duration = start_time.elapsed();
    stats
}

/// The message and backtrace of the most recent panic, captured by the hook
/// [`install_panic_hook`] sets.
static LAST_PANIC: Mutex<Option<String>> = Mutex::new(None);

fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let backtrace = backtrace::Backtrace::new();
        let report = format!("{info}\n    panic backtrace:\n{backtrace:?}");
        if let Ok(mut last) = LAST_PANIC.lock() {
            *last = Some(report);
        }
    }));
}

/// Runs `tc`, turning a panic in its body into a failed outcome.
fn run_catching_panics(tc: &TestCase, framework: &Framework) -> TestOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| tc.run(framework))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = LAST_PANIC
                .lock()
                .ok()
                .and_then(|mut last| last.take())
                .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "test panicked".to_string());
            TestOutcome::Failed(Some(message))
        }
    }
}

/// Sets a Ctrl-C handler and returns the flag it raises. A second Ctrl-C
/// exits immediately with the customary SIGINT exit code.
fn set_sigint_handler() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    let result = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            error!("SIGINT received while shutting down, rudely terminating");
            error!("nodes and chassis created by the current test may leak!");
            std::process::exit(130);
        }
        warn!("SIGINT received, stopping after the current test");
    });

    if let Err(e) = result {
        warn!(error = %e, "Failed to set SIGINT handler");
    }
    interrupted
}
