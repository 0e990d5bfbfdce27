//! Run reporting.
//!
//! A [`Reporter`] receives lifecycle events while tests are triggered and
//! polled. Every hook has a default empty body, so a reporter implements
//! exactly the subset it cares about; [`MultiReporter`] fans each event out
//! to its members in registration order, isolating each dispatch so that a
//! panicking member cannot prevent the others from being called.

pub mod junit;

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;

use crate::backend::{ExecutionRule, InternalTest, PollResult, ResultError, TestOverride};
use crate::runner::classify::{self, Summary};

pub use junit::JUnitReporter;

/// Deep link to a result in the backend's application UI.
pub fn result_url(base_url: &str, public_id: &str, result_id: &str) -> String {
    format!(
        "{}/synthetics/details/{}/result/{}",
        base_url.trim_end_matches('/'),
        public_id,
        result_id
    )
}

/// A run reporter. Implement any subset of the hooks.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// A non-fatal error diagnostic.
    async fn error(&self, _message: &str) {}

    /// Identifiers that could not be resolved, surfaced together after all
    /// lookups settle.
    async fn init_errors(&self, _errors: &[String]) {}

    /// A free-form informational message.
    async fn log(&self, _message: &str) {}

    /// The run is starting.
    async fn report_start(&self, _start_time: SystemTime) {}

    /// A test was resolved and will be (or, for `skipped`, will not be)
    /// part of the trigger request.
    async fn test_trigger(
        &self,
        _test: &InternalTest,
        _test_id: &str,
        _execution_rule: ExecutionRule,
        _config: &TestOverride,
    ) {
    }

    /// An individual test is now being waited on.
    async fn test_wait(&self, _test: &InternalTest) {}

    /// The full batch has been triggered and polling begins.
    async fn tests_wait(&self, _tests: &[InternalTest]) {}

    /// A terminal result arrived from the backend (or was synthesised).
    async fn result_received(&self, _result: &PollResult) {}

    /// A result has been classified.
    async fn result_end(&self, _result: &PollResult, _base_url: &str) {}

    /// All results for one test are in.
    async fn test_end(
        &self,
        _test: &InternalTest,
        _results: &[PollResult],
        _base_url: &str,
        _location_names: &HashMap<u32, String>,
        _fail_on_critical_errors: bool,
        _fail_on_timeout: bool,
    ) {
    }

    /// The run is over.
    async fn run_end(&self, _summary: &Summary, _base_url: &str) {}
}

/// A reporter that ignores every event.
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {}

/// Fans events out to several reporters, in registration order.
#[derive(Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Appends a reporter. Events reach reporters in the order they were
    /// added.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

/// Runs one member's hook, swallowing a panic so the remaining members
/// still get the event.
async fn isolate(hook: &str, dispatch: impl Future<Output = ()>) {
    if AssertUnwindSafe(dispatch).catch_unwind().await.is_err() {
        warn!("a reporter panicked in its {hook} hook; continuing with the rest");
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn error(&self, message: &str) {
        for reporter in &self.reporters {
            isolate("error", reporter.error(message)).await;
        }
    }

    async fn init_errors(&self, errors: &[String]) {
        for reporter in &self.reporters {
            isolate("init_errors", reporter.init_errors(errors)).await;
        }
    }

    async fn log(&self, message: &str) {
        for reporter in &self.reporters {
            isolate("log", reporter.log(message)).await;
        }
    }

    async fn report_start(&self, start_time: SystemTime) {
        for reporter in &self.reporters {
            isolate("report_start", reporter.report_start(start_time)).await;
        }
    }

    async fn test_trigger(
        &self,
        test: &InternalTest,
        test_id: &str,
        execution_rule: ExecutionRule,
        config: &TestOverride,
    ) {
        for reporter in &self.reporters {
            isolate(
                "test_trigger",
                reporter.test_trigger(test, test_id, execution_rule, config),
            )
            .await;
        }
    }

    async fn test_wait(&self, test: &InternalTest) {
        for reporter in &self.reporters {
            isolate("test_wait", reporter.test_wait(test)).await;
        }
    }

    async fn tests_wait(&self, tests: &[InternalTest]) {
        for reporter in &self.reporters {
            isolate("tests_wait", reporter.tests_wait(tests)).await;
        }
    }

    async fn result_received(&self, result: &PollResult) {
        for reporter in &self.reporters {
            isolate("result_received", reporter.result_received(result)).await;
        }
    }

    async fn result_end(&self, result: &PollResult, base_url: &str) {
        for reporter in &self.reporters {
            isolate("result_end", reporter.result_end(result, base_url)).await;
        }
    }

    async fn test_end(
        &self,
        test: &InternalTest,
        results: &[PollResult],
        base_url: &str,
        location_names: &HashMap<u32, String>,
        fail_on_critical_errors: bool,
        fail_on_timeout: bool,
    ) {
        for reporter in &self.reporters {
            isolate(
                "test_end",
                reporter.test_end(
                    test,
                    results,
                    base_url,
                    location_names,
                    fail_on_critical_errors,
                    fail_on_timeout,
                ),
            )
            .await;
        }
    }

    async fn run_end(&self, summary: &Summary, base_url: &str) {
        for reporter in &self.reporters {
            isolate("run_end", reporter.run_end(summary, base_url)).await;
        }
    }
}

/// Terminal reporter: trigger lines, a wait progress bar, per-result
/// verdict lines and a closing summary block.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }

    fn println(&self, line: String) {
        match self.progress.lock().unwrap().as_ref() {
            Some(pb) => pb.println(line),
            None => println!("{line}"),
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn error(&self, message: &str) {
        eprintln!("{} {}", console::style("ERROR").red().bold(), message);
    }

    async fn init_errors(&self, errors: &[String]) {
        for error in errors {
            eprintln!("{} {}", console::style("NOT FOUND").yellow().bold(), error);
        }
    }

    async fn log(&self, message: &str) {
        self.println(message.to_string());
    }

    async fn test_trigger(
        &self,
        test: &InternalTest,
        test_id: &str,
        execution_rule: ExecutionRule,
        _config: &TestOverride,
    ) {
        let name = test.name.as_deref().unwrap_or(test_id);
        let rule = match execution_rule {
            ExecutionRule::Blocking => console::style("blocking").cyan(),
            ExecutionRule::NonBlocking => console::style("non-blocking").cyan(),
            ExecutionRule::Skipped => console::style("skipped").yellow(),
        };
        self.println(format!("Triggering {name} [{test_id}] ({rule})"));
    }

    async fn tests_wait(&self, tests: &[InternalTest]) {
        self.println(format!("Waiting for {} test(s)...", tests.len()));

        let pb = indicatif::ProgressBar::new(tests.len() as u64);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        *self.progress.lock().unwrap() = Some(pb);
    }

    async fn result_received(&self, result: &PollResult) {
        if let Some(pb) = self.progress.lock().unwrap().as_ref() {
            pb.inc(1);
        }
        if self.verbose {
            self.println(format!("Received result {}", result.result_id));
        }
    }

    async fn test_end(
        &self,
        test: &InternalTest,
        results: &[PollResult],
        base_url: &str,
        location_names: &HashMap<u32, String>,
        fail_on_critical_errors: bool,
        fail_on_timeout: bool,
    ) {
        let name = test.name.as_deref().unwrap_or(&test.public_id);
        for result in results {
            let passed = classify::has_result_passed(
                &result.result,
                fail_on_critical_errors,
                fail_on_timeout,
            );
            let status = if passed {
                console::style("PASS").green()
            } else {
                console::style("FAIL").red()
            };
            let location = location_names
                .get(&result.dc_id)
                .cloned()
                .unwrap_or_else(|| format!("location {}", result.dc_id));
            let duration = classify::get_result_duration(&result.result);

            let mut line = format!("{status} {name} ({location}, {duration} ms)");
            if let Some(error) = &result.result.error {
                let label = match error {
                    ResultError::Timeout => "timed out",
                    ResultError::Tunnel => "tunnel dropped",
                    ResultError::Endpoint => "result endpoint unavailable",
                    ResultError::Other(message) => message.as_str(),
                };
                line.push_str(&format!(" - {label}"));
            }
            line.push_str(&format!(
                "\n     {}",
                console::style(result_url(base_url, &test.public_id, &result.result_id)).dim()
            ));
            self.println(line);
        }
    }

    async fn run_end(&self, summary: &Summary, _base_url: &str) {
        if let Some(pb) = self.progress.lock().unwrap().take() {
            pb.finish_and_clear();
        }

        println!();
        println!("Run summary:");
        println!("  Passed:       {}", console::style(summary.passed).green());
        println!("  Failed:       {}", console::style(summary.failed).red());
        println!(
            "  Non-blocking: {}",
            console::style(summary.failed_non_blocking).yellow()
        );
        println!("  Skipped:      {}", summary.skipped);

        if summary.timed_out > 0 {
            println!(
                "  Timed out:    {}",
                console::style(summary.timed_out).red()
            );
        }
        if summary.critical_errors > 0 {
            println!(
                "  Critical:     {}",
                console::style(summary.critical_errors).red().bold()
            );
        }
        if !summary.tests_not_found.is_empty() {
            let mut missing: Vec<_> = summary.tests_not_found.iter().cloned().collect();
            missing.sort();
            println!("  Not found:    {}", missing.join(", "));
        }
        if let Some(batch_id) = &summary.batch_id {
            println!("  Batch:        {batch_id}");
        }

        println!();
        if summary.is_success() {
            println!("{}", console::style("All tests passed.").green().bold());
        } else {
            println!("{}", console::style("Some tests failed.").red().bold());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records its registration slot on each `log` event.
    struct OrderProbe {
        slot: usize,
        calls: Arc<Mutex<Vec<usize>>>,
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Reporter for OrderProbe {
        async fn log(&self, _message: &str) {
            self.calls.lock().unwrap().push(self.slot);
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn fan_out_respects_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let multi = MultiReporter::new()
            .with_reporter(OrderProbe {
                slot: 0,
                calls: Arc::clone(&calls),
                count: Arc::clone(&count),
            })
            .with_reporter(OrderProbe {
                slot: 1,
                calls: Arc::clone(&calls),
                count: Arc::clone(&count),
            });

        multi.log("first").await;
        multi.log("second").await;

        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 0, 1]);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    struct PanickingReporter;

    #[async_trait]
    impl Reporter for PanickingReporter {
        async fn log(&self, _message: &str) {
            panic!("reporter blew up");
        }
    }

    #[tokio::test]
    async fn a_panicking_member_does_not_block_the_rest() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let multi = MultiReporter::new()
            .with_reporter(PanickingReporter)
            .with_reporter(OrderProbe {
                slot: 1,
                calls: Arc::clone(&calls),
                count: Arc::clone(&count),
            });

        multi.log("still delivered").await;

        assert_eq!(*calls.lock().unwrap(), vec![1]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn members_without_a_hook_are_silently_skipped() {
        // NullReporter implements nothing; dispatching through it is a no-op.
        let multi = MultiReporter::new().with_reporter(NullReporter);
        multi.error("ignored").await;
        multi
            .run_end(&Summary::default(), "https://app.example.com")
            .await;
    }

    #[test]
    fn result_urls_join_cleanly() {
        assert_eq!(
            result_url("https://app.example.com/", "abc-def-ghi", "res-1"),
            "https://app.example.com/synthetics/details/abc-def-ghi/result/res-1"
        );
    }
}
