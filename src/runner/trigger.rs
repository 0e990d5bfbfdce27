//! Submission of the batched trigger request.

use tracing::debug;

use crate::backend::{BackendClient, TestPayload, Trigger, TriggerRequest};
use crate::ci;
use crate::runner::RunError;

/// Triggers all payloads in one request, with CI/git metadata and the
/// trigger-app tag attached.
///
/// The backend treats the batch atomically, so any failure is wrapped into a
/// single [`RunError::TriggerFailed`] naming every submitted public id and
/// carrying the HTTP status when one was observed.
pub async fn trigger_tests<C>(client: &C, payloads: Vec<TestPayload>) -> Result<Trigger, RunError>
where
    C: BackendClient + ?Sized,
{
    let request = TriggerRequest {
        tests: payloads,
        metadata: Some(ci::collect_metadata()),
    };
    debug!("triggering {} test(s)", request.tests.len());

    client.trigger_tests(&request).await.map_err(|source| {
        let public_ids = request
            .tests
            .iter()
            .map(|payload| payload.public_id.clone())
            .collect();
        RunError::TriggerFailed {
            public_ids,
            status: source.status(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::backend::{
        BackendError, BackendResult, ExecutionRule, InternalTest, PollResult, TriggerResponse,
    };

    struct CapturingBackend {
        captured: Mutex<Option<serde_json::Value>>,
        outcome: Mutex<Option<BackendResult<Trigger>>>,
    }

    impl CapturingBackend {
        fn answering(outcome: BackendResult<Trigger>) -> Self {
            Self {
                captured: Mutex::new(None),
                outcome: Mutex::new(Some(outcome)),
            }
        }
    }

    #[async_trait]
    impl BackendClient for CapturingBackend {
        async fn get_test(&self, _public_id: &str) -> BackendResult<InternalTest> {
            unreachable!("the dispatcher never fetches tests")
        }

        async fn trigger_tests(&self, request: &TriggerRequest) -> BackendResult<Trigger> {
            *self.captured.lock().unwrap() = Some(serde_json::to_value(request).unwrap());
            self.outcome.lock().unwrap().take().unwrap()
        }

        async fn poll_results(&self, _result_ids: &[String]) -> BackendResult<Vec<PollResult>> {
            unreachable!("the dispatcher never polls")
        }
    }

    #[tokio::test]
    async fn request_carries_payloads_and_metadata() {
        let backend = CapturingBackend::answering(Ok(Trigger {
            batch_id: Some("batch-7".to_string()),
            locations: Vec::new(),
            results: vec![TriggerResponse {
                public_id: "abc-def-ghi".to_string(),
                result_id: "res-1".to_string(),
                device: "chrome.laptop_large".to_string(),
                location: 1,
            }],
        }));

        let trigger = trigger_tests(
            &backend,
            vec![TestPayload::new("abc-def-ghi", ExecutionRule::Blocking)],
        )
        .await
        .unwrap();
        assert_eq!(trigger.batch_id.as_deref(), Some("batch-7"));

        let body = backend.captured.lock().unwrap().clone().unwrap();
        assert_eq!(body["tests"][0]["public_id"], "abc-def-ghi");
        assert_eq!(body["tests"][0]["executionRule"], "blocking");
        // The trigger-app tag always rides along.
        assert!(body["metadata"]["trigger_app"].is_string());
    }

    #[tokio::test]
    async fn failures_wrap_every_public_id_and_the_status() {
        let backend = CapturingBackend::answering(Err(BackendError::Server {
            status: 503,
            message: "maintenance".to_string(),
        }));

        let error = trigger_tests(
            &backend,
            vec![
                TestPayload::new("aaa-aaa-aaa", ExecutionRule::Blocking),
                TestPayload::new("bbb-bbb-bbb", ExecutionRule::NonBlocking),
            ],
        )
        .await
        .unwrap_err();

        match &error {
            RunError::TriggerFailed {
                public_ids,
                status,
                ..
            } => {
                assert_eq!(public_ids, &["aaa-aaa-aaa", "bbb-bbb-bbb"]);
                assert_eq!(*status, Some(503));
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = error.to_string();
        assert!(message.contains("aaa-aaa-aaa"));
        assert!(message.contains("bbb-bbb-bbb"));
        assert!(message.contains("503"));
    }

    #[tokio::test]
    async fn transport_failures_wrap_without_a_status() {
        let backend = CapturingBackend::answering(Err(BackendError::Transport(
            "connection refused".to_string(),
        )));

        let error = trigger_tests(
            &backend,
            vec![TestPayload::new("aaa-aaa-aaa", ExecutionRule::Blocking)],
        )
        .await
        .unwrap_err();

        match error {
            RunError::TriggerFailed { status, .. } => assert_eq!(status, None),
            other => panic!("unexpected error: {other}"),
        }
    }
}
