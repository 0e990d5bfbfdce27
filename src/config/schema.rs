//! Configuration schema definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::TestOverride;
use crate::runner::RunOptions;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Core run settings.
    #[serde(default)]
    pub synthrun: SynthrunConfig,

    /// Backend endpoint and credentials.
    pub backend: BackendConfig,

    /// Repository-level test overrides, applied under each suite entry's
    /// own config. Keys match the suite-file override schema.
    #[serde(default)]
    pub defaults: TestOverride,

    /// Report configuration (optional).
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Translates the file-level settings into engine options.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            public_ids: self.synthrun.public_ids.clone(),
            files: self.synthrun.files.clone(),
            defaults: self.defaults.clone(),
            default_polling_timeout: Duration::from_millis(self.synthrun.polling_timeout_ms),
            fail_on_critical_errors: self.synthrun.fail_on_critical_errors,
            fail_on_timeout: self.synthrun.fail_on_timeout,
            app_base_url: self.backend.app_base_url.clone(),
        }
    }
}

/// Core run settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthrunConfig {
    /// Glob patterns locating suite files.
    #[serde(default = "default_files")]
    pub files: Vec<String>,

    /// Tests referenced directly, outside any suite file.
    #[serde(default)]
    pub public_ids: Vec<String>,

    /// Default per-test polling budget in milliseconds.
    #[serde(default = "default_polling_timeout_ms")]
    pub polling_timeout_ms: u64,

    /// Fail the run when the backend degrades or reports unhealthy results.
    #[serde(default)]
    pub fail_on_critical_errors: bool,

    /// Fail the run when a test blows its polling budget.
    #[serde(default = "default_true")]
    pub fail_on_timeout: bool,

    /// Overrides the trigger-app tag sent in request metadata.
    #[serde(default)]
    pub trigger_app: Option<String>,
}

impl Default for SynthrunConfig {
    fn default() -> Self {
        Self {
            files: default_files(),
            public_ids: Vec::new(),
            polling_timeout_ms: default_polling_timeout_ms(),
            fail_on_critical_errors: false,
            fail_on_timeout: true,
            trigger_app: None,
        }
    }
}

fn default_files() -> Vec<String> {
    vec!["**/*.synthetics.json".to_string()]
}

fn default_polling_timeout_ms() -> u64 {
    120_000 // 2 minutes
}

fn default_true() -> bool {
    true
}

/// Backend endpoint and credentials.
///
/// `api_key` and `app_key` support `${VAR}` / `${VAR:-default}` environment
/// expansion so that secrets stay out of the file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Base URL of the application UI, used to build result links.
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,

    pub api_key: String,
    pub app_key: String,
}

fn default_base_url() -> String {
    "https://api.synthetics.example.com/api/v1".to_string()
}

fn default_app_base_url() -> String {
    "https://app.synthetics.example.com".to_string()
}

/// Report configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Where to write a JUnit XML report; none by default.
    pub junit: Option<PathBuf>,
}
