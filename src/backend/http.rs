//! HTTP implementation of the backend contract.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::backend::{
    BackendClient, BackendError, BackendResult, InternalTest, PollResult, Trigger, TriggerRequest,
};
use crate::retry::retry;

use async_trait::async_trait;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TRANSIENT_RETRIES: usize = 3;

/// Talks to the backend over HTTPS with API and application keys.
///
/// Transient failures (transport errors and 5xx responses) are retried a few
/// times with a linear back-off before they surface; semantic errors (404,
/// 403) surface immediately.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    app_key: String,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            app_key: app_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(
        response: reqwest::Response,
        public_id: Option<&str>,
    ) -> BackendResult<reqwest::Response> {
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status, public_id, message))
    }
}

/// Maps a non-2xx status to the error kind callers dispatch on.
fn classify_status(status: u16, public_id: Option<&str>, message: String) -> BackendError {
    match status {
        404 => BackendError::NotFound {
            public_id: public_id.unwrap_or("<unknown>").to_string(),
        },
        403 => BackendError::Forbidden {
            public_id: public_id.unwrap_or("<unknown>").to_string(),
        },
        500..=599 => BackendError::Server { status, message },
        other => BackendError::Transport(format!("unexpected HTTP {other}: {message}")),
    }
}

/// Back-off policy for the transient failure classes.
fn transient_backoff(retries: usize, error: &BackendError) -> Option<Duration> {
    if retries >= MAX_TRANSIENT_RETRIES {
        return None;
    }
    match error {
        BackendError::Server { .. } | BackendError::Transport(_) => {
            Some(Duration::from_millis(500 * (retries as u64 + 1)))
        }
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    results: Vec<PollResult>,
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn get_test(&self, public_id: &str) -> BackendResult<InternalTest> {
        retry(
            || async move {
                debug!("fetching test {public_id}");
                let response = self
                    .http
                    .get(self.endpoint(&format!("synthetics/tests/{public_id}")))
                    .header("X-API-Key", &self.api_key)
                    .header("X-Application-Key", &self.app_key)
                    .timeout(REQUEST_TIMEOUT)
                    .send()
                    .await
                    .map_err(|error| BackendError::Transport(error.to_string()))?;
                Self::check(response, Some(public_id))
                    .await?
                    .json::<InternalTest>()
                    .await
                    .map_err(|error| BackendError::Decode(error.to_string()))
            },
            transient_backoff,
        )
        .await
    }

    async fn trigger_tests(&self, request: &TriggerRequest) -> BackendResult<Trigger> {
        retry(
            || async move {
                debug!("triggering {} payload(s)", request.tests.len());
                let response = self
                    .http
                    .post(self.endpoint("synthetics/tests/trigger/ci"))
                    .header("X-API-Key", &self.api_key)
                    .header("X-Application-Key", &self.app_key)
                    .timeout(REQUEST_TIMEOUT)
                    .json(request)
                    .send()
                    .await
                    .map_err(|error| BackendError::Transport(error.to_string()))?;
                Self::check(response, None)
                    .await?
                    .json::<Trigger>()
                    .await
                    .map_err(|error| BackendError::Decode(error.to_string()))
            },
            transient_backoff,
        )
        .await
    }

    async fn poll_results(&self, result_ids: &[String]) -> BackendResult<Vec<PollResult>> {
        let ids = serde_json::to_string(result_ids)
            .map_err(|error| BackendError::Decode(error.to_string()))?;
        let ids: &str = ids.as_str();
        let response: PollResponse = retry(
            || async move {
                debug!("polling {} result id(s)", result_ids.len());
                let response = self
                    .http
                    .get(self.endpoint("synthetics/tests/poll_results"))
                    .header("X-API-Key", &self.api_key)
                    .header("X-Application-Key", &self.app_key)
                    .query(&[("result_ids", ids)])
                    .timeout(REQUEST_TIMEOUT)
                    .send()
                    .await
                    .map_err(|error| BackendError::Transport(error.to_string()))?;
                Self::check(response, None)
                    .await?
                    .json::<PollResponse>()
                    .await
                    .map_err(|error| BackendError::Decode(error.to_string()))
            },
            transient_backoff,
        )
        .await?;
        Ok(response.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_distinguishable_errors() {
        assert!(matches!(
            classify_status(404, Some("abc-def-ghi"), String::new()),
            BackendError::NotFound { public_id } if public_id == "abc-def-ghi"
        ));
        assert!(matches!(
            classify_status(403, Some("abc-def-ghi"), String::new()),
            BackendError::Forbidden { .. }
        ));
        assert!(matches!(
            classify_status(502, None, "bad gateway".to_string()),
            BackendError::Server { status: 502, .. }
        ));
        assert!(matches!(
            classify_status(418, None, String::new()),
            BackendError::Transport(_)
        ));
    }

    #[test]
    fn only_transient_errors_are_retried() {
        let server = BackendError::Server {
            status: 503,
            message: String::new(),
        };
        assert!(transient_backoff(0, &server).is_some());
        assert!(transient_backoff(MAX_TRANSIENT_RETRIES, &server).is_none());

        let transport = BackendError::Transport("reset".to_string());
        assert!(transient_backoff(1, &transport).is_some());

        let not_found = BackendError::NotFound {
            public_id: "abc-def-ghi".to_string(),
        };
        assert!(transient_backoff(0, &not_found).is_none());

        let forbidden = BackendError::Forbidden {
            public_id: "abc-def-ghi".to_string(),
        };
        assert!(transient_backoff(0, &forbidden).is_none());
    }

    #[test]
    fn backoff_grows_linearly() {
        let transport = BackendError::Transport("reset".to_string());
        assert_eq!(
            transient_backoff(0, &transport),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            transient_backoff(2, &transport),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn base_url_trailing_slash_is_tolerated() {
        let backend = HttpBackend::new("https://api.example.com/api/v1/", "key", "app");
        assert_eq!(
            backend.endpoint("synthetics/tests/abc-def-ghi"),
            "https://api.example.com/api/v1/synthetics/tests/abc-def-ghi"
        );
    }
}
