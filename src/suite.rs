//! Test suite discovery and identifier normalisation.
//!
//! Suites are JSON documents matching the backend's trigger-config schema:
//! a `tests` array of `{id, config}` entries. They are found by glob
//! pattern; an empty match set is only worth a log line, while an unreadable
//! or malformed file is fatal and names the file.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::backend::TestOverride;
use crate::report::Reporter;

/// A loaded suite file.
#[derive(Debug, Clone)]
pub struct Suite {
    /// Path the suite was loaded from.
    pub name: String,
    pub content: SuiteContent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteContent {
    #[serde(default)]
    pub tests: Vec<TriggerConfig>,
}

/// One entry of a suite: a test reference plus its overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    pub id: String,
    #[serde(default)]
    pub config: TestOverride,
}

#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("failed to read test suite {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse test suite {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid file pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

static PUBLIC_ID_RE: OnceLock<Regex> = OnceLock::new();

fn public_id_re() -> &'static Regex {
    PUBLIC_ID_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]{3}-[A-Za-z0-9]{3}-[A-Za-z0-9]{3}$").expect("valid id regex")
    })
}

/// Normalises a test reference to its public id.
///
/// A bare `xxx-xxx-xxx` id passes through unchanged; for anything longer
/// (typically a URL pasted from the application) the suffix after the last
/// `/` is taken when it has the id shape. Unrecognised references are
/// returned as-is and left for the backend to reject.
pub fn normalize_public_id(reference: &str) -> String {
    if public_id_re().is_match(reference) {
        return reference.to_string();
    }
    if let Some(tail) = reference.rsplit('/').next() {
        if public_id_re().is_match(tail) {
            return tail.to_string();
        }
    }
    reference.to_string()
}

/// Loads every suite file matching `pattern`.
///
/// Matches are visited in path order so that runs are reproducible. An
/// empty match set is reported through the reporter and yields an empty
/// vector.
pub async fn discover_suites(
    pattern: &str,
    reporter: &dyn Reporter,
) -> Result<Vec<Suite>, SuiteError> {
    let matcher = glob_to_regex(pattern).map_err(|source| SuiteError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = WalkDir::new(static_prefix(pattern))
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let text = path.to_string_lossy();
            matcher.is_match(text.strip_prefix("./").unwrap_or(&text))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        reporter
            .log(&format!("no test files found matching {pattern}"))
            .await;
        return Ok(Vec::new());
    }

    let mut suites = Vec::with_capacity(paths.len());
    for path in paths {
        debug!("loading test suite {}", path.display());
        let raw = std::fs::read_to_string(&path).map_err(|source| SuiteError::Read {
            path: path.clone(),
            source,
        })?;
        let content: SuiteContent =
            serde_json::from_str(&raw).map_err(|source| SuiteError::Parse {
                path: path.clone(),
                source,
            })?;
        suites.push(Suite {
            name: path.display().to_string(),
            content,
        });
    }
    Ok(suites)
}

/// The longest wildcard-free directory prefix of a glob pattern; walking
/// starts there.
fn static_prefix(pattern: &str) -> PathBuf {
    let mut prefix = if pattern.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::new()
    };
    let segments: Vec<&str> = pattern.split('/').collect();
    // The last segment is a file name, never part of the walk root.
    for segment in &segments[..segments.len().saturating_sub(1)] {
        if segment.is_empty() {
            continue;
        }
        if segment.contains('*') || segment.contains('?') {
            break;
        }
        prefix.push(segment);
    }
    if prefix.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        prefix
    }
}

/// Translates a glob pattern to an anchored regex. `**` crosses directory
/// separators, `*` and `?` do not.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut translated = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        translated.push_str("(?:.*/)?");
                    } else {
                        translated.push_str(".*");
                    }
                } else {
                    translated.push_str("[^/]*");
                }
            }
            '?' => translated.push_str("[^/]"),
            c if r"\.+()|[]{}^$".contains(c) => {
                translated.push('\\');
                translated.push(c);
            }
            c => translated.push(c),
        }
    }
    translated.push('$');
    Regex::new(&translated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::report::NullReporter;

    struct LogCapture {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Reporter for LogCapture {
        async fn log(&self, message: &str) {
            self.lines.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn bare_ids_pass_through() {
        assert_eq!(normalize_public_id("abc-def-ghi"), "abc-def-ghi");
    }

    #[test]
    fn url_references_reduce_to_their_last_segment() {
        assert_eq!(
            normalize_public_id("https://example/tests/abc-def-ghi"),
            "abc-def-ghi"
        );
    }

    #[test]
    fn unrecognised_references_are_kept_for_the_backend_to_reject() {
        assert_eq!(normalize_public_id("not-an-id"), "not-an-id");
        assert_eq!(
            normalize_public_id("https://example/tests/not-an-id"),
            "https://example/tests/not-an-id"
        );
    }

    #[test]
    fn globs_translate_segment_wise() {
        let re = glob_to_regex("tests/**/*.synthetics.json").unwrap();
        assert!(re.is_match("tests/shop.synthetics.json"));
        assert!(re.is_match("tests/api/a/b/checkout.synthetics.json"));
        assert!(!re.is_match("tests/shop.synthetics.json.bak"));
        assert!(!re.is_match("other/shop.synthetics.json"));

        let single = glob_to_regex("*.synthetics.json").unwrap();
        assert!(single.is_match("shop.synthetics.json"));
        assert!(!single.is_match("nested/shop.synthetics.json"));
    }

    #[test]
    fn static_prefix_stops_at_the_first_wildcard() {
        assert_eq!(
            static_prefix("suites/ci/*.json"),
            PathBuf::from("suites/ci")
        );
        assert_eq!(static_prefix("**/*.json"), PathBuf::from("."));
        assert_eq!(static_prefix("*.json"), PathBuf::from("."));
    }

    #[tokio::test]
    async fn discovers_and_parses_matching_suites() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("api");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            dir.path().join("shop.synthetics.json"),
            r#"{"tests": [{"id": "abc-def-ghi", "config": {"startUrl": "https://example.com"}}]}"#,
        )
        .unwrap();
        std::fs::write(
            nested.join("checkout.synthetics.json"),
            r#"{"tests": [{"id": "jkl-mno-pqr"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a suite").unwrap();

        let pattern = format!("{}/**/*.synthetics.json", dir.path().display());
        let suites = discover_suites(&pattern, &NullReporter).await.unwrap();

        assert_eq!(suites.len(), 2);
        let ids: Vec<&str> = suites
            .iter()
            .flat_map(|suite| suite.content.tests.iter().map(|t| t.id.as_str()))
            .collect();
        assert!(ids.contains(&"abc-def-ghi"));
        assert!(ids.contains(&"jkl-mno-pqr"));

        let with_override = suites
            .iter()
            .flat_map(|suite| &suite.content.tests)
            .find(|t| t.id == "abc-def-ghi")
            .unwrap();
        assert_eq!(
            with_override.config.start_url.as_deref(),
            Some("https://example.com")
        );
    }

    #[tokio::test]
    async fn empty_match_set_is_logged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.synthetics.json", dir.path().display());
        let capture = LogCapture {
            lines: Mutex::new(Vec::new()),
        };

        let suites = discover_suites(&pattern, &capture).await.unwrap();
        assert!(suites.is_empty());
        let lines = capture.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("no test files found"));
    }

    #[tokio::test]
    async fn malformed_suites_are_fatal_and_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.synthetics.json");
        std::fs::write(&path, "{not json").unwrap();

        let pattern = format!("{}/*.synthetics.json", dir.path().display());
        let error = discover_suites(&pattern, &NullReporter).await.unwrap_err();
        assert!(matches!(error, SuiteError::Parse { .. }));
        assert!(error.to_string().contains("broken.synthetics.json"));
    }

    #[tokio::test]
    async fn unknown_override_keys_in_suites_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("suite.synthetics.json"),
            r#"{"tests": [{"id": "abc-def-ghi", "config": {"pollingTimeout": 1000, "mystery": true}}]}"#,
        )
        .unwrap();

        let pattern = format!("{}/*.synthetics.json", dir.path().display());
        let suites = discover_suites(&pattern, &NullReporter).await.unwrap();
        assert_eq!(
            suites[0].content.tests[0].config.polling_timeout,
            Some(1000)
        );
    }
}
