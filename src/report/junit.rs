//! JUnit XML reporting for CI systems.
//!
//! Accumulates one `<testsuite>` per test as `testEnd` events arrive and
//! writes the full `<testsuites>` document when the run ends. One
//! `<testcase>` is emitted per result, so a test probed from three
//! locations shows up as three cases.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::backend::{InternalTest, PollResult, ResultError};
use crate::report::Reporter;
use crate::runner::classify::{self, Summary};

/// Collects results and writes a JUnit XML file at the end of the run.
pub struct JUnitReporter {
    path: PathBuf,
    suites: Mutex<Vec<SuiteRecord>>,
}

struct SuiteRecord {
    name: String,
    cases: Vec<CaseRecord>,
}

struct CaseRecord {
    name: String,
    duration_ms: u64,
    failure: Option<String>,
}

impl JUnitReporter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            suites: Mutex::new(Vec::new()),
        }
    }

    fn render(&self) -> String {
        let suites = self.suites.lock().unwrap();

        let total: usize = suites.iter().map(|suite| suite.cases.len()).sum();
        let failures: usize = suites
            .iter()
            .flat_map(|suite| &suite.cases)
            .filter(|case| case.failure.is_some())
            .count();
        let time: f64 = suites
            .iter()
            .flat_map(|suite| &suite.cases)
            .map(|case| case.duration_ms as f64 / 1000.0)
            .sum();

        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuites name=\"synthrun\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\">\n",
            total, failures, time
        ));

        for suite in suites.iter() {
            let suite_failures = suite
                .cases
                .iter()
                .filter(|case| case.failure.is_some())
                .count();
            let suite_time: f64 = suite
                .cases
                .iter()
                .map(|case| case.duration_ms as f64 / 1000.0)
                .sum();
            xml.push_str(&format!(
                "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\">\n",
                escape(&suite.name),
                suite.cases.len(),
                suite_failures,
                suite_time
            ));

            for case in &suite.cases {
                if let Some(failure) = &case.failure {
                    xml.push_str(&format!(
                        "    <testcase name=\"{}\" time=\"{:.3}\">\n",
                        escape(&case.name),
                        case.duration_ms as f64 / 1000.0
                    ));
                    xml.push_str(&format!(
                        "      <failure message=\"{}\"/>\n",
                        escape(failure)
                    ));
                    xml.push_str("    </testcase>\n");
                } else {
                    xml.push_str(&format!(
                        "    <testcase name=\"{}\" time=\"{:.3}\"/>\n",
                        escape(&case.name),
                        case.duration_ms as f64 / 1000.0
                    ));
                }
            }

            xml.push_str("  </testsuite>\n");
        }

        xml.push_str("</testsuites>\n");
        xml
    }
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn test_end(
        &self,
        test: &InternalTest,
        results: &[PollResult],
        _base_url: &str,
        location_names: &HashMap<u32, String>,
        fail_on_critical_errors: bool,
        fail_on_timeout: bool,
    ) {
        let suite_name = test
            .name
            .clone()
            .unwrap_or_else(|| test.public_id.clone());

        let cases = results
            .iter()
            .map(|result| {
                let location = location_names
                    .get(&result.dc_id)
                    .cloned()
                    .unwrap_or_else(|| format!("location {}", result.dc_id));
                let passed = classify::has_result_passed(
                    &result.result,
                    fail_on_critical_errors,
                    fail_on_timeout,
                );
                CaseRecord {
                    name: format!("{} ({location})", test.public_id),
                    duration_ms: classify::get_result_duration(&result.result),
                    failure: (!passed).then(|| describe_failure(result)),
                }
            })
            .collect();

        self.suites.lock().unwrap().push(SuiteRecord {
            name: suite_name,
            cases,
        });
    }

    async fn run_end(&self, _summary: &Summary, _base_url: &str) {
        if let Some(parent) = self.path.parent() {
            if let Err(error) = std::fs::create_dir_all(parent) {
                warn!(
                    "could not create JUnit output directory {}: {error}",
                    parent.display()
                );
                return;
            }
        }
        match std::fs::write(&self.path, self.render()) {
            Ok(()) => info!("wrote JUnit report to {}", self.path.display()),
            Err(error) => warn!(
                "could not write JUnit report to {}: {error}",
                self.path.display()
            ),
        }
    }
}

fn describe_failure(result: &PollResult) -> String {
    match (&result.result.error, &result.result.error_code) {
        (Some(ResultError::Timeout), _) => "result timed out".to_string(),
        (Some(ResultError::Tunnel), _) => "tunnel went down".to_string(),
        (Some(ResultError::Endpoint), _) => "result endpoint unavailable".to_string(),
        (Some(ResultError::Other(message)), _) => message.clone(),
        (None, Some(code)) => format!("error code {code}"),
        (None, None) => "assertion failed".to_string(),
    }
}

/// Escapes a string for use in an XML attribute.
fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        EventType, ResultDetail, TestConfig, TestOptions, TestType,
    };

    fn test(public_id: &str, name: &str) -> InternalTest {
        InternalTest {
            public_id: public_id.to_string(),
            name: Some(name.to_string()),
            test_type: TestType::Api,
            subtype: Some("http".to_string()),
            config: TestConfig::default(),
            options: TestOptions::default(),
        }
    }

    fn result(result_id: &str, passed: bool, duration: f64) -> PollResult {
        PollResult {
            result_id: result_id.to_string(),
            dc_id: 1,
            timestamp: 1,
            result: ResultDetail {
                event_type: Some(EventType::Finished),
                passed: Some(passed),
                duration: Some(duration),
                ..ResultDetail::default()
            },
        }
    }

    #[tokio::test]
    async fn renders_one_suite_per_test_and_one_case_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junit.xml");
        let reporter = JUnitReporter::new(path.clone());

        let locations: HashMap<u32, String> =
            [(1, "Frankfurt (AWS)".to_string())].into_iter().collect();

        reporter
            .test_end(
                &test("aaa-aaa-aaa", "checkout <flow> & pay"),
                &[result("res-1", true, 320.0), result("res-2", false, 45.0)],
                "https://app.example.com",
                &locations,
                false,
                true,
            )
            .await;
        reporter
            .run_end(&Summary::default(), "https://app.example.com")
            .await;

        let xml = std::fs::read_to_string(&path).unwrap();
        assert!(xml.contains("tests=\"2\""));
        assert!(xml.contains("failures=\"1\""));
        // Attribute content is escaped.
        assert!(xml.contains("checkout &lt;flow&gt; &amp; pay"));
        assert!(xml.contains("aaa-aaa-aaa (Frankfurt (AWS))"));
        assert!(xml.contains("<failure message=\"assertion failed\"/>"));
        assert!(xml.contains("time=\"0.320\""));
    }

    #[tokio::test]
    async fn timeouts_are_described_as_such() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junit.xml");
        let reporter = JUnitReporter::new(path.clone());

        let mut timed_out = result("res-1", false, 0.0);
        timed_out.result.error = Some(ResultError::Timeout);

        reporter
            .test_end(
                &test("aaa-aaa-aaa", "slow api"),
                &[timed_out],
                "https://app.example.com",
                &HashMap::new(),
                false,
                true,
            )
            .await;
        reporter
            .run_end(&Summary::default(), "https://app.example.com")
            .await;

        let xml = std::fs::read_to_string(&path).unwrap();
        assert!(xml.contains("result timed out"));
        assert!(xml.contains("location 1"));
    }
}
