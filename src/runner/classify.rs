//! Result classification and run summarisation.
//!
//! A poll result carries a partially-observed verdict: `passed`, `error`,
//! `errorCode` and `unhealthy` may each be absent. [`has_result_passed`]
//! folds them into a single boolean under the active policy flags; a test's
//! overall verdict is the conjunction over all of its results.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::backend::{ExecutionRule, PollResult, ResultDetail, ResultError};

/// Classifies one result under the policy flags.
///
/// Critical errors (`unhealthy`, `ENDPOINT`) and timeouts pass when their
/// respective flag is off; an explicit `passed` wins next; a bare
/// `errorCode` fails; a result with no verdict at all counts as a pass.
pub fn has_result_passed(
    result: &ResultDetail,
    fail_on_critical_errors: bool,
    fail_on_timeout: bool,
) -> bool {
    let critical =
        result.unhealthy == Some(true) || result.error == Some(ResultError::Endpoint);
    if critical && !fail_on_critical_errors {
        return true;
    }
    if result.error == Some(ResultError::Timeout) && !fail_on_timeout {
        return true;
    }
    if let Some(passed) = result.passed {
        return passed;
    }
    if result.error_code.is_some() {
        return false;
    }
    true
}

/// Overall verdict for a test: every one of its results must pass.
pub fn has_test_succeeded(
    results: &[PollResult],
    fail_on_critical_errors: bool,
    fail_on_timeout: bool,
) -> bool {
    results
        .iter()
        .all(|result| has_result_passed(&result.result, fail_on_critical_errors, fail_on_timeout))
}

/// Wall-clock duration of a result in milliseconds: `duration` if present,
/// else `timings.total`, else zero.
pub fn get_result_duration(result: &ResultDetail) -> u64 {
    if let Some(duration) = result.duration {
        return duration.round() as u64;
    }
    if let Some(timings) = &result.timings {
        return timings.total.round() as u64;
    }
    0
}

/// Aggregate counters for one invocation.
///
/// `passed`, `failed` and `failed_non_blocking` count tests;
/// `timed_out` and `critical_errors` count individual results, since one
/// test can run from several locations. `skipped` is incremented where the
/// skip decision is made, before anything is triggered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub batch_id: Option<String>,
    pub passed: usize,
    pub failed: usize,
    pub failed_non_blocking: usize,
    pub skipped: usize,
    pub timed_out: usize,
    pub critical_errors: usize,
    pub tests_not_found: BTreeSet<String>,
}

impl Summary {
    /// Folds one test's results into the counters.
    pub fn record_test(
        &mut self,
        execution_rule: ExecutionRule,
        results: &[PollResult],
        fail_on_critical_errors: bool,
        fail_on_timeout: bool,
    ) {
        self.timed_out += results
            .iter()
            .filter(|r| r.result.error == Some(ResultError::Timeout))
            .count();
        self.critical_errors += results
            .iter()
            .filter(|r| {
                r.result.unhealthy == Some(true) || r.result.error == Some(ResultError::Endpoint)
            })
            .count();

        if has_test_succeeded(results, fail_on_critical_errors, fail_on_timeout) {
            self.passed += 1;
        } else if execution_rule == ExecutionRule::NonBlocking {
            self.failed_non_blocking += 1;
        } else {
            self.failed += 1;
        }
    }

    /// `true` when nothing blocking failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Conventional process exit code for this summary.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}
