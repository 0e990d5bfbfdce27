//! The trigger-and-wait engine.
//!
//! This module coordinates a full invocation: resolve test references into
//! payloads, submit them in one batched trigger request, drive the polling
//! loop until every execution has a terminal result, classify, and
//! summarise.
//!
//! # Flow
//!
//! ```text
//!  suite files / public ids
//!        │
//!        ▼
//!  suite::discover_suites ──► Vec<TriggerConfig>
//!        │
//!        ▼  (parallel lookups, not-found accumulated)
//!  BackendClient::get_test ──► InternalTest
//!        │
//!        ▼
//!  payload::build_payload ──► Vec<TestPayload>   (skipped rules drop out)
//!        │
//!        ▼
//!  trigger::trigger_tests ──► Trigger
//!        │
//!        ▼
//!  poll::Poller::wait_for_results ──► public_id → Vec<PollResult>
//!        │
//!        ▼
//!  classify::Summary  ──► exit code (in the binary)
//! ```
//!
//! Reporters receive lifecycle events at every stage; see
//! [`Reporter`](crate::report::Reporter).

pub mod classify;
pub mod payload;
pub mod poll;
pub mod template;
pub mod trigger;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::future::join_all;
use tracing::info;

use crate::backend::{
    BackendClient, BackendError, ExecutionRule, InternalTest, PollResult, TestOverride,
    TestPayload,
};
use crate::report::Reporter;
use crate::suite::{self, SuiteError, TriggerConfig};
use crate::tunnel::Tunnel;

pub use classify::Summary;
pub use poll::{DEFAULT_POLLING_TIMEOUT, Poller};

/// Errors that abort an invocation.
///
/// Everything recoverable (missing tests, per-result timeouts, tunnel drops,
/// degraded polling) is folded into the summary instead.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Every candidate test was skipped or not found.
    #[error("no tests to trigger")]
    NoTestsToTrigger,

    /// The batched trigger request failed; the batch is atomic, so all
    /// submitted ids are implicated.
    #[error(
        "failed to trigger tests [{}]{}: {source}",
        .public_ids.join(", "),
        .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
    )]
    TriggerFailed {
        public_ids: Vec<String>,
        status: Option<u16>,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Suite(#[from] SuiteError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Settings for one invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Test references passed directly, outside any suite file.
    pub public_ids: Vec<String>,

    /// Glob patterns for suite files.
    pub files: Vec<String>,

    /// Repository-level overrides, merged under each suite entry's own.
    pub defaults: TestOverride,

    /// Budget for tests without a `pollingTimeout` override.
    pub default_polling_timeout: Duration,

    pub fail_on_critical_errors: bool,
    pub fail_on_timeout: bool,

    /// Base URL of the backend's application UI, used for result links.
    pub app_base_url: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            public_ids: Vec::new(),
            files: Vec::new(),
            defaults: TestOverride::default(),
            default_polling_timeout: DEFAULT_POLLING_TIMEOUT,
            fail_on_critical_errors: false,
            fail_on_timeout: true,
            app_base_url: "https://app.synthetics.example.com".to_string(),
        }
    }
}

/// The outcome of an invocation: the summary plus every terminal result.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: Summary,
    pub results: HashMap<String, Vec<PollResult>>,
}

/// Runs batches of synthetic tests end to end.
pub struct Runner<C, R> {
    client: C,
    reporter: R,
    options: RunOptions,
    tunnel: Option<Arc<dyn Tunnel>>,
    poll_interval: Option<Duration>,
}

impl<C, R> Runner<C, R>
where
    C: BackendClient,
    R: Reporter,
{
    pub fn new(options: RunOptions, client: C, reporter: R) -> Self {
        Self {
            client,
            reporter,
            options,
            tunnel: None,
            poll_interval: None,
        }
    }

    /// Attaches a reverse tunnel whose liveness gates the whole batch.
    pub fn with_tunnel(mut self, tunnel: Arc<dyn Tunnel>) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    /// Overrides the pause between polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Resolves, triggers, waits and classifies. Returns the summary and the
    /// terminal results; translating the summary into an exit code is the
    /// caller's business.
    pub async fn run(&self) -> Result<RunOutcome, RunError> {
        self.reporter.report_start(SystemTime::now()).await;

        let entries = self.collect_entries().await?;
        let mut summary = Summary::default();

        // Look every reference up in parallel; lookups never cancel each
        // other, and not-found only surfaces once all of them settle.
        let lookups = entries.iter().map(|entry| {
            let public_id = suite::normalize_public_id(&entry.id);
            async move {
                let fetched = self.client.get_test(&public_id).await;
                (entry, public_id, fetched)
            }
        });
        let resolved = join_all(lookups).await;

        let mut error_messages = Vec::new();
        let mut tests: Vec<InternalTest> = Vec::new();
        let mut payloads: Vec<TestPayload> = Vec::new();

        for (entry, public_id, fetched) in resolved {
            match fetched {
                Ok(test) => {
                    let overrides = payload::merge_overrides(&self.options.defaults, &entry.config);
                    let rule = payload::resolve_execution_rule(&test, Some(&overrides));
                    self.reporter
                        .test_trigger(&test, &public_id, rule, &overrides)
                        .await;
                    if rule == ExecutionRule::Skipped {
                        info!("skipping test {public_id}");
                        summary.skipped += 1;
                        continue;
                    }

                    let test_payload =
                        payload::build_payload(&test, &public_id, &overrides, &self.reporter).await;
                    self.reporter.test_wait(&test).await;
                    payloads.push(test_payload);
                    tests.push(test);
                }
                Err(BackendError::NotFound { .. }) => {
                    error_messages.push(format!("test {public_id} not found"));
                    summary.tests_not_found.insert(public_id);
                }
                Err(error) => return Err(error.into()),
            }
        }

        if !error_messages.is_empty() {
            self.reporter.init_errors(&error_messages).await;
        }
        if payloads.is_empty() {
            return Err(RunError::NoTestsToTrigger);
        }

        let triggered = trigger::trigger_tests(&self.client, payloads.clone()).await?;
        summary.batch_id = triggered.batch_id.clone();

        self.reporter.tests_wait(&tests).await;
        let mut poller = Poller::new(&self.client, &self.reporter)
            .with_default_timeout(self.options.default_polling_timeout)
            .with_fail_on_critical_errors(self.options.fail_on_critical_errors);
        if let Some(interval) = self.poll_interval {
            poller = poller.with_poll_interval(interval);
        }
        let results = poller
            .wait_for_results(&triggered, &payloads, self.tunnel.clone())
            .await?;

        let location_names: HashMap<u32, String> = triggered
            .locations
            .iter()
            .map(|location| (location.id, location.display_name.clone()))
            .collect();

        for (test, test_payload) in tests.iter().zip(&payloads) {
            let test_results = results
                .get(&test_payload.public_id)
                .cloned()
                .unwrap_or_default();
            for result in &test_results {
                self.reporter
                    .result_end(result, &self.options.app_base_url)
                    .await;
            }
            self.reporter
                .test_end(
                    test,
                    &test_results,
                    &self.options.app_base_url,
                    &location_names,
                    self.options.fail_on_critical_errors,
                    self.options.fail_on_timeout,
                )
                .await;
            summary.record_test(
                test_payload.execution_rule,
                &test_results,
                self.options.fail_on_critical_errors,
                self.options.fail_on_timeout,
            );
        }

        self.reporter
            .run_end(&summary, &self.options.app_base_url)
            .await;
        Ok(RunOutcome { summary, results })
    }

    /// Direct public ids first, then every suite file in glob order.
    async fn collect_entries(&self) -> Result<Vec<TriggerConfig>, RunError> {
        let mut entries: Vec<TriggerConfig> = self
            .options
            .public_ids
            .iter()
            .map(|id| TriggerConfig {
                id: id.clone(),
                config: TestOverride::default(),
            })
            .collect();

        for pattern in &self.options.files {
            for suite in suite::discover_suites(pattern, &self.reporter).await? {
                entries.extend(suite.content.tests);
            }
        }
        Ok(entries)
    }
}
