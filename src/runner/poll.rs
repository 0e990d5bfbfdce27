//! The wait loop: batched polling with deadlines, tunnel liveness and
//! degraded-backend fallback.
//!
//! Every triggered execution reaches a terminal result exactly once, by one
//! of four routes: a `finished` poll result, its own deadline expiring, the
//! tunnel dropping, or the result endpoint degrading while
//! `fail_on_critical_errors` is off. The deadline check deliberately runs
//! before each poll, so a result that is already past its budget is
//! recorded as a timeout even when the same iteration's poll would have
//! carried a real verdict; pending-ness is rechecked on attach, so whichever
//! route terminates first wins and the other is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::{
    BackendClient, BackendError, Device, EventType, PollResult, ResultDetail, ResultError,
    TestPayload, Trigger, TriggerResponse,
};
use crate::report::Reporter;
use crate::tunnel::{self, Tunnel};

/// Budget for a test's result when neither the suite nor the defaults say
/// otherwise.
pub const DEFAULT_POLLING_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Pause between poll requests.
const POLL_INTERVAL: Duration = Duration::from_millis(5_000);

/// One triggered execution and its polling state.
#[derive(Debug, Clone)]
struct TriggerResult {
    response: TriggerResponse,
    polling_timeout: Duration,
    result: Option<PollResult>,
}

/// Drives the wait loop for one triggered batch.
pub struct Poller<'a, C, R>
where
    C: BackendClient + ?Sized,
    R: Reporter + ?Sized,
{
    client: &'a C,
    reporter: &'a R,
    default_timeout: Duration,
    poll_interval: Duration,
    fail_on_critical_errors: bool,
}

impl<'a, C, R> Poller<'a, C, R>
where
    C: BackendClient + ?Sized,
    R: Reporter + ?Sized,
{
    pub fn new(client: &'a C, reporter: &'a R) -> Self {
        Self {
            client,
            reporter,
            default_timeout: DEFAULT_POLLING_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            fail_on_critical_errors: false,
        }
    }

    /// Budget applied to tests without a `pollingTimeout` override.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Pause between polls. The production default is five seconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// When set, a 5xx from the result endpoint aborts the run instead of
    /// synthesising `ENDPOINT` results.
    pub fn with_fail_on_critical_errors(mut self, flag: bool) -> Self {
        self.fail_on_critical_errors = flag;
        self
    }

    /// Waits until every triggered execution has a terminal result and
    /// returns them keyed by public id, in trigger-response order.
    pub async fn wait_for_results(
        &self,
        trigger: &Trigger,
        payloads: &[TestPayload],
        tunnel: Option<Arc<dyn Tunnel>>,
    ) -> Result<HashMap<String, Vec<PollResult>>, BackendError> {
        let timeouts: HashMap<&str, Duration> = payloads
            .iter()
            .filter_map(|payload| {
                payload
                    .polling_timeout
                    .map(|ms| (payload.public_id.as_str(), Duration::from_millis(ms)))
            })
            .collect();

        let mut states: Vec<TriggerResult> = trigger
            .results
            .iter()
            .map(|response| TriggerResult {
                polling_timeout: timeouts
                    .get(response.public_id.as_str())
                    .copied()
                    .unwrap_or(self.default_timeout),
                response: response.clone(),
                result: None,
            })
            .collect();

        let has_tunnel = tunnel.is_some();
        let connected = tunnel.map(tunnel::watch_liveness);
        let polling_start = Instant::now();
        let max_timeout = states
            .iter()
            .map(|state| state.polling_timeout)
            .max()
            .unwrap_or(self.default_timeout);

        while states.iter().any(|state| state.result.is_none()) {
            let elapsed = polling_start.elapsed();

            // Per-test deadlines first; a late poll result must not revive
            // an execution that already blew its budget.
            for state in states.iter_mut().filter(|state| state.result.is_none()) {
                if elapsed >= state.polling_timeout {
                    debug!(
                        "result {} timed out after {:?}",
                        state.response.result_id, state.polling_timeout
                    );
                    state.result = Some(synthesize_failure(
                        &state.response,
                        ResultError::Timeout,
                        has_tunnel,
                    ));
                }
            }

            if let Some(flag) = &connected {
                if !flag.load(Ordering::SeqCst) {
                    warn!("tunnel is down, failing every pending result");
                    for state in states.iter_mut().filter(|state| state.result.is_none()) {
                        state.result = Some(synthesize_failure(
                            &state.response,
                            ResultError::Tunnel,
                            has_tunnel,
                        ));
                    }
                }
            }

            if elapsed >= max_timeout {
                break;
            }

            let pending_ids: Vec<String> = states
                .iter()
                .filter(|state| state.result.is_none())
                .map(|state| state.response.result_id.clone())
                .collect();
            if pending_ids.is_empty() {
                break;
            }

            match self.client.poll_results(&pending_ids).await {
                Ok(poll_results) => {
                    for poll_result in poll_results {
                        if poll_result.result.event_type != Some(EventType::Finished) {
                            continue;
                        }
                        if let Some(state) = states.iter_mut().find(|state| {
                            state.result.is_none()
                                && state.response.result_id == poll_result.result_id
                        }) {
                            self.reporter.result_received(&poll_result).await;
                            state.result = Some(poll_result);
                        }
                    }
                }
                Err(error) if error.is_server_error() && !self.fail_on_critical_errors => {
                    warn!("result endpoint degraded ({error}), failing every pending result");
                    for state in states.iter_mut().filter(|state| state.result.is_none()) {
                        state.result = Some(synthesize_failure(
                            &state.response,
                            ResultError::Endpoint,
                            has_tunnel,
                        ));
                    }
                }
                Err(error) => return Err(error),
            }

            if states.iter().any(|state| state.result.is_none()) {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        let mut results: HashMap<String, Vec<PollResult>> = HashMap::new();
        for state in states {
            let result = state.result.unwrap_or_else(|| {
                // Unreachable in practice: leaving the loop implies every
                // state is terminal. Synthesising keeps the one-result-per
                // -trigger invariant regardless.
                synthesize_failure(&state.response, ResultError::Timeout, has_tunnel)
            });
            results
                .entry(state.response.public_id)
                .or_default()
                .push(result);
        }
        Ok(results)
    }
}

/// A locally-synthesised terminal result (timeout, tunnel drop, degraded
/// endpoint).
fn synthesize_failure(
    response: &TriggerResponse,
    error: ResultError,
    has_tunnel: bool,
) -> PollResult {
    PollResult {
        result_id: response.result_id.clone(),
        dc_id: response.location,
        timestamp: 0,
        result: ResultDetail {
            device: Some(Device {
                id: response.device.clone(),
                width: 0,
                height: 0,
            }),
            duration: Some(0.0),
            error: Some(error),
            error_code: None,
            event_type: Some(EventType::Finished),
            passed: Some(false),
            start_url: Some(String::new()),
            step_details: Vec::new(),
            timings: None,
            tunnel: Some(has_tunnel),
            unhealthy: None,
        },
    }
}
