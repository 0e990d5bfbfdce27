//! Resolution of user overrides into trigger payloads.

use crate::backend::{ExecutionRule, InternalTest, TestOverride, TestPayload};
use crate::report::Reporter;
use crate::runner::template;

/// Resolves the execution rule for a test under an optional override.
///
/// The strictest of the two rules wins, under the total order
/// `skipped > non_blocking > blocking`. A test without a server-side rule
/// counts as `blocking`; an override without a rule defers to the test.
pub fn resolve_execution_rule(
    test: &InternalTest,
    test_override: Option<&TestOverride>,
) -> ExecutionRule {
    let test_rule = test.execution_rule();
    match test_override.and_then(|o| o.execution_rule) {
        Some(override_rule) => override_rule.max(test_rule),
        None => test_rule,
    }
}

/// Merges two override sets field-by-field; keys set in `overlay` win over
/// `base`. Used to apply a suite entry's config on top of the repository
/// defaults.
pub fn merge_overrides(base: &TestOverride, overlay: &TestOverride) -> TestOverride {
    TestOverride {
        allow_insecure_certificates: overlay
            .allow_insecure_certificates
            .or(base.allow_insecure_certificates),
        basic_auth: overlay.basic_auth.clone().or_else(|| base.basic_auth.clone()),
        body: overlay.body.clone().or_else(|| base.body.clone()),
        body_type: overlay.body_type.clone().or_else(|| base.body_type.clone()),
        cookies: overlay.cookies.clone().or_else(|| base.cookies.clone()),
        default_step_timeout: overlay.default_step_timeout.or(base.default_step_timeout),
        device_ids: overlay.device_ids.clone().or_else(|| base.device_ids.clone()),
        execution_rule: overlay.execution_rule.or(base.execution_rule),
        follow_redirects: overlay.follow_redirects.or(base.follow_redirects),
        headers: overlay.headers.clone().or_else(|| base.headers.clone()),
        locations: overlay.locations.clone().or_else(|| base.locations.clone()),
        polling_timeout: overlay.polling_timeout.or(base.polling_timeout),
        retry: overlay.retry.clone().or_else(|| base.retry.clone()),
        start_url: overlay.start_url.clone().or_else(|| base.start_url.clone()),
        start_url_substitution_regex: overlay
            .start_url_substitution_regex
            .clone()
            .or_else(|| base.start_url_substitution_regex.clone()),
        tunnel: overlay.tunnel.clone().or_else(|| base.tunnel.clone()),
        variables: overlay.variables.clone().or_else(|| base.variables.clone()),
    }
}

/// Builds the trigger payload for one test.
///
/// An absent or empty override produces the bare `{public_id, executionRule}`
/// payload. Otherwise the recognised override keys are carried over, and a
/// `startUrl` is template-rendered against the test's request URL when the
/// test navigates (browser tests and `http`-subtype API tests). Rendering
/// diagnostics go through the reporter; nothing here is fatal.
pub async fn build_payload(
    test: &InternalTest,
    public_id: &str,
    test_override: &TestOverride,
    reporter: &dyn Reporter,
) -> TestPayload {
    let execution_rule = resolve_execution_rule(test, Some(test_override));
    let mut payload = TestPayload::new(public_id, execution_rule);

    if test_override.is_empty() {
        return payload;
    }

    payload.allow_insecure_certificates = test_override.allow_insecure_certificates;
    payload.basic_auth = test_override.basic_auth.clone();
    payload.body = test_override.body.clone();
    payload.body_type = test_override.body_type.clone();
    payload.cookies = test_override.cookies.clone();
    payload.default_step_timeout = test_override.default_step_timeout;
    payload.device_ids = test_override.device_ids.clone();
    payload.follow_redirects = test_override.follow_redirects;
    payload.headers = test_override.headers.clone();
    payload.locations = test_override.locations.clone();
    payload.polling_timeout = test_override.polling_timeout;
    payload.retry = test_override.retry.clone();
    payload.start_url_substitution_regex = test_override.start_url_substitution_regex.clone();
    payload.tunnel = test_override.tunnel.clone();
    payload.variables = test_override.variables.clone();

    if let Some(start_url) = &test_override.start_url {
        if test.supports_start_url() {
            let request_url = test
                .config
                .request
                .as_ref()
                .map(|request| request.url.as_str())
                .unwrap_or_default();
            let rendered = template::render_start_url(start_url, request_url);
            for warning in &rendered.warnings {
                reporter.log(warning).await;
            }
            for error in &rendered.errors {
                reporter.error(error).await;
            }
            payload.start_url = Some(rendered.url);
        }
    }

    payload
}
