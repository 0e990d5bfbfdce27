//! Backend data model and client contract.
//!
//! This module defines the wire types exchanged with the synthetics backend
//! and the [`BackendClient`] trait that the rest of the crate consumes. The
//! trait keeps the core pluggable: production code talks to the HTTP
//! implementation in [`http`], while tests substitute in-memory fakes.
//!
//! # The contract
//!
//! | Operation | Behaviour |
//! |-----------|-----------|
//! | [`get_test`](BackendClient::get_test) | Fetches a test definition; 404, 403 and 5xx map to distinguishable [`BackendError`] variants |
//! | [`trigger_tests`](BackendClient::trigger_tests) | Submits one batched trigger request; atomic, all-or-nothing |
//! | [`poll_results`](BackendClient::poll_results) | Fetches results for a set of result ids; ids missing from the response are still pending |

pub mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ci::CiMetadata;

pub use http::HttpBackend;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced by a [`BackendClient`].
///
/// The variants are deliberately coarse: callers dispatch on *kind*, not on
/// message text. Not-found accumulates into the run summary, forbidden and
/// unexpected errors abort the run, and server errors are subject to the
/// degraded-backend fallback during polling.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend does not recognise the test identifier.
    #[error("test {public_id} not found")]
    NotFound { public_id: String },

    /// The credentials do not grant access to the test.
    #[error("access to test {public_id} is forbidden")]
    Forbidden { public_id: String },

    /// The backend answered with a 5xx status.
    #[error("backend unavailable (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The request never produced an HTTP response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Returns `true` for 5xx responses.
    pub fn is_server_error(&self) -> bool {
        matches!(self, BackendError::Server { .. })
    }

    /// The HTTP status associated with this error, if one was observed.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::NotFound { .. } => Some(404),
            BackendError::Forbidden { .. } => Some(403),
            BackendError::Server { status, .. } => Some(*status),
            BackendError::Transport(_) | BackendError::Decode(_) => None,
        }
    }
}

/// Client for the synthetics backend.
///
/// Implementations must be cheap to share across tasks (`&self` methods,
/// `Send + Sync`).
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Fetches the definition of a single test.
    async fn get_test(&self, public_id: &str) -> BackendResult<InternalTest>;

    /// Submits a batched trigger request for all payloads at once.
    async fn trigger_tests(&self, request: &TriggerRequest) -> BackendResult<Trigger>;

    /// Polls for results. The response may cover only a subset of the
    /// requested ids; a missing id means that result is still pending.
    async fn poll_results(&self, result_ids: &[String]) -> BackendResult<Vec<PollResult>>;
}

/// The kind of synthetic test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    /// HTTP/API check.
    Api,
    /// Headless browser check.
    Browser,
}

/// Per-test CI policy: what a failing result does to the job.
///
/// The variants are ordered by strictness so that the strictest of two rules
/// is simply their [`max`](Ord::max): `skipped > non_blocking > blocking`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionRule {
    /// A failing result fails the CI job.
    #[default]
    Blocking,
    /// A failing result is reported but does not fail the job.
    NonBlocking,
    /// The test is not triggered at all.
    Skipped,
}

/// A test definition as the backend describes it.
///
/// Immutable within an invocation; the trigger payload is derived from it
/// plus user-supplied overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalTest {
    pub public_id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub test_type: TestType,

    /// Refinement of `type`, e.g. `http` for plain HTTP API checks.
    #[serde(default)]
    pub subtype: Option<String>,

    #[serde(default)]
    pub config: TestConfig,

    #[serde(default)]
    pub options: TestOptions,
}

impl InternalTest {
    /// The server-side execution rule, defaulting to [`ExecutionRule::Blocking`].
    pub fn execution_rule(&self) -> ExecutionRule {
        self.options
            .ci
            .as_ref()
            .and_then(|ci| ci.execution_rule)
            .unwrap_or_default()
    }

    /// Whether a `startUrl` override applies to this test: browser tests and
    /// `http`-subtype API tests navigate to a start URL, other API checks
    /// do not.
    pub fn supports_start_url(&self) -> bool {
        match self.test_type {
            TestType::Browser => true,
            TestType::Api => self.subtype.as_deref() == Some("http"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub request: Option<ConfigRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRequest {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestOptions {
    #[serde(default)]
    pub ci: Option<CiOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiOptions {
    #[serde(default)]
    pub execution_rule: Option<ExecutionRule>,
}

/// HTTP basic-auth credentials passed through to the probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Server-side retry policy for a test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub count: Option<u64>,
    /// Milliseconds between attempts.
    pub interval: Option<f64>,
}

/// Connection coordinates of the reverse tunnel, forwarded to the backend so
/// the probe can reach endpoints behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelMeta {
    pub host: String,
    pub id: String,
}

/// User-supplied overrides for one test.
///
/// This is the set of recognised option keys; anything else in a suite file
/// or config table is discarded on deserialisation. All fields are optional
/// so that overrides merge field-by-field over the repository defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestOverride {
    pub allow_insecure_certificates: Option<bool>,
    pub basic_auth: Option<BasicAuth>,
    pub body: Option<String>,
    pub body_type: Option<String>,
    pub cookies: Option<String>,
    pub default_step_timeout: Option<f64>,
    pub device_ids: Option<Vec<String>>,
    pub execution_rule: Option<ExecutionRule>,
    pub follow_redirects: Option<bool>,
    pub headers: Option<HashMap<String, String>>,
    pub locations: Option<Vec<String>>,
    /// Wall-clock budget in milliseconds for this test's result to arrive.
    pub polling_timeout: Option<u64>,
    pub retry: Option<RetryPolicy>,
    pub start_url: Option<String>,
    pub start_url_substitution_regex: Option<String>,
    pub tunnel: Option<TunnelMeta>,
    pub variables: Option<HashMap<String, String>>,
}

impl TestOverride {
    /// Returns `true` when no recognised key is set.
    pub fn is_empty(&self) -> bool {
        *self == TestOverride::default()
    }
}

/// What is actually sent to the backend for one test.
///
/// Always carries the public id and the resolved execution rule; override
/// fields are present only when set, and `startUrl` only after template
/// rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPayload {
    #[serde(rename = "public_id")]
    pub public_id: String,

    pub execution_rule: ExecutionRule,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_insecure_certificates: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_step_timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_redirects: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polling_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_url_substitution_regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,
}

impl TestPayload {
    /// A payload carrying only the identity and the resolved rule.
    pub fn new(public_id: impl Into<String>, execution_rule: ExecutionRule) -> Self {
        Self {
            public_id: public_id.into(),
            execution_rule,
            allow_insecure_certificates: None,
            basic_auth: None,
            body: None,
            body_type: None,
            cookies: None,
            default_step_timeout: None,
            device_ids: None,
            follow_redirects: None,
            headers: None,
            locations: None,
            polling_timeout: None,
            retry: None,
            start_url: None,
            start_url_substitution_regex: None,
            tunnel: None,
            variables: None,
        }
    }
}

/// The batched trigger request body.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerRequest {
    pub tests: Vec<TestPayload>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CiMetadata>,
}

/// The backend's answer to a trigger request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub batch_id: Option<String>,

    /// Descriptors for the locations the batch runs from.
    #[serde(default)]
    pub locations: Vec<Location>,

    /// One entry per submitted payload and probe location.
    #[serde(default)]
    pub results: Vec<TriggerResponse>,
}

/// A probe location descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub id: u32,
    pub display_name: String,
}

/// One triggered execution: which test, where, and under which result id.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerResponse {
    pub public_id: String,
    pub result_id: String,
    pub device: String,
    /// Numeric id of the location this execution runs from.
    pub location: u32,
}

/// A polled result as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    #[serde(rename = "resultID")]
    pub result_id: String,

    pub dc_id: u32,

    /// Backend-side completion timestamp (epoch ms); zero for results
    /// synthesised locally.
    pub timestamp: u64,

    pub result: ResultDetail,
}

/// The verdict-bearing part of a poll result.
///
/// The verdict is only partially observed: `passed`, `error`, `errorCode`
/// and `unhealthy` may each be absent. The classifier in
/// [`runner::classify`](crate::runner::classify) folds them into a single
/// outcome under the active policy flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResultDetail {
    pub device: Option<Device>,
    pub duration: Option<f64>,
    pub error: Option<ResultError>,
    pub error_code: Option<String>,
    pub event_type: Option<EventType>,
    pub passed: Option<bool>,
    pub start_url: Option<String>,
    pub step_details: Vec<serde_json::Value>,
    pub timings: Option<Timings>,
    pub tunnel: Option<bool>,
    pub unhealthy: Option<bool>,
}

/// Non-assertion failure classes, plus free-form errors from the probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultError {
    /// Local deadline expired before a terminal result arrived.
    #[serde(rename = "TIMEOUT")]
    Timeout,
    /// The reverse tunnel dropped while results were pending.
    #[serde(rename = "TUNNEL")]
    Tunnel,
    /// The result endpoint was unavailable and the run degraded.
    #[serde(rename = "ENDPOINT")]
    Endpoint,
    /// Any other error string reported by the probe.
    #[serde(untagged)]
    Other(String),
}

/// Lifecycle stage of a poll result. Only `finished` results are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Finished,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub total: f64,
}
