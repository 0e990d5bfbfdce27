//! # synthrun
//!
//! Trigger remote synthetic tests (HTTP/API checks and headless browser
//! checks) from CI, wait for their results, and turn the outcome into an
//! exit code.
//!
//! ## Overview
//!
//! The tests themselves run on an observability backend; synthrun only
//! resolves which tests to run, fires one batched trigger request, and polls
//! until every execution has a terminal result. It provides:
//!
//! - **Suite files** - JSON descriptors found by glob, with per-test overrides
//! - **Override resolution** - repository defaults, execution rules and
//!   `{{ NAME }}` start-URL templating
//! - **Bounded polling** - per-test deadlines, tunnel liveness and a
//!   degraded-backend fallback
//! - **Pluggable reporting** - console output and JUnit XML for CI systems
//!
//! ## Architecture
//!
//! ### Backend ([`backend`])
//!
//! The wire model and the [`BackendClient`] contract, with the production
//! HTTP implementation in [`backend::http`]. Tests substitute in-memory
//! fakes.
//!
//! ### Runner ([`runner`])
//!
//! The trigger-and-wait engine: [`runner::payload`] resolves overrides,
//! [`runner::trigger`] submits the batch, [`runner::poll`] drives the wait
//! loop, and [`runner::classify`] decides what passed under the active
//! policy flags.
//!
//! ### Reporting ([`report`])
//!
//! Reporters receive lifecycle events during the run:
//!
//! - [`report::ConsoleReporter`] - terminal output with a progress bar
//! - [`report::JUnitReporter`] - JUnit XML for CI systems
//! - [`report::MultiReporter`] - combine multiple reporters
//!
//! ## Quick Start
//!
//! ```no_run
//! use synthrun::backend::HttpBackend;
//! use synthrun::config::load_config;
//! use synthrun::report::{ConsoleReporter, JUnitReporter, MultiReporter};
//! use synthrun::runner::Runner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("synthrun.toml"))?;
//!
//!     let client = HttpBackend::new(
//!         &config.backend.base_url,
//!         &config.backend.api_key,
//!         &config.backend.app_key,
//!     );
//!
//!     let reporter = MultiReporter::new()
//!         .with_reporter(ConsoleReporter::new(false))
//!         .with_reporter(JUnitReporter::new("test-results/junit.xml".into()));
//!
//!     let outcome = Runner::new(config.run_options(), client, reporter)
//!         .run()
//!         .await?;
//!     std::process::exit(outcome.summary.exit_code());
//! }
//! ```
//!
//! ## Configuration
//!
//! synthrun is configured via a TOML file; see [`config`] for the schema.
//!
//! ```toml
//! [synthrun]
//! files = ["tests/**/*.synthetics.json"]
//! polling_timeout_ms = 120000
//! fail_on_timeout = true
//!
//! [backend]
//! api_key = "${SYNTHRUN_API_KEY}"
//! app_key = "${SYNTHRUN_APP_KEY}"
//!
//! [defaults]
//! startUrl = "{{PROTOCOL}}//staging.{{DOMAIN}}{{PATHNAME}}"
//!
//! [report]
//! junit = "test-results/junit.xml"
//! ```
//!
//! [`BackendClient`]: backend::BackendClient

pub mod backend;
pub mod ci;
pub mod config;
pub mod report;
pub mod retry;
pub mod runner;
pub mod suite;
pub mod tunnel;

// Re-export the types most callers need when wiring up a run.

pub use backend::{BackendClient, BackendError, HttpBackend};
pub use config::{Config, load_config};
pub use report::{ConsoleReporter, JUnitReporter, MultiReporter, Reporter};
pub use runner::{RunError, RunOptions, RunOutcome, Runner, Summary};
pub use tunnel::Tunnel;
