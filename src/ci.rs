//! CI and git metadata discovery.
//!
//! Trigger requests carry metadata describing the CI pipeline and git state
//! they were fired from, assembled here from the `DD_CI_*` / `DD_GIT_*`
//! environment variables. Every field is optional and empty-string values
//! are dropped, so a bare shell produces an empty (but well-formed) payload.

use std::env;
use std::sync::RwLock;

use serde::Serialize;

/// Identifier of the integration surface that fired the trigger, when the
/// caller does not say otherwise.
pub const DEFAULT_TRIGGER_APP: &str = "npm_package";

// Set at most once by CLI/config before the first run, read by every
// trigger dispatch afterwards.
static TRIGGER_APP: RwLock<Option<String>> = RwLock::new(None);

/// The current trigger-app tag.
pub fn trigger_app() -> String {
    TRIGGER_APP
        .read()
        .ok()
        .and_then(|guard| guard.clone())
        .unwrap_or_else(|| DEFAULT_TRIGGER_APP.to_string())
}

/// Overrides the trigger-app tag for the rest of the process.
pub fn set_trigger_app(name: impl Into<String>) {
    if let Ok(mut guard) = TRIGGER_APP.write() {
        *guard = Some(name.into());
    }
}

/// Metadata attached to a trigger request.
#[derive(Debug, Clone, Serialize)]
pub struct CiMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<CiInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,

    pub trigger_app: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CiInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageInfo {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_author: Option<CommitActor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_committer: Option<CommitActor>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitActor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// A git ref classified as either a branch or a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    Branch(String),
    Tag(String),
}

/// Normalises a git ref.
///
/// Refs under a `tags/` namespace (`refs/tags/`, `origin/tags/`,
/// `refs/heads/tags/`) classify as tags; everything else is a branch with
/// any `refs/heads/` or `origin/` prefix stripped.
///
/// ```
/// use synthrun::ci::{GitRef, normalize_ref};
///
/// assert_eq!(normalize_ref("refs/heads/main"), GitRef::Branch("main".to_string()));
/// assert_eq!(normalize_ref("origin/feature/x"), GitRef::Branch("feature/x".to_string()));
/// assert_eq!(normalize_ref("refs/tags/v1.2"), GitRef::Tag("v1.2".to_string()));
/// ```
pub fn normalize_ref(git_ref: &str) -> GitRef {
    for prefix in ["refs/tags/", "origin/tags/", "refs/heads/tags/"] {
        if let Some(name) = git_ref.strip_prefix(prefix) {
            return GitRef::Tag(name.to_string());
        }
    }

    let name = git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("origin/"))
        .unwrap_or(git_ref);
    GitRef::Branch(name.to_string())
}

/// Assembles trigger metadata from the environment and the current
/// trigger-app tag.
pub fn collect_metadata() -> CiMetadata {
    CiMetadata {
        ci: ci_info(),
        git: git_info(),
        trigger_app: trigger_app(),
    }
}

/// Reads an environment variable, treating the empty string as unset.
fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn ci_info() -> Option<CiInfo> {
    let job = {
        let name = non_empty_env("DD_CI_JOB_NAME");
        let url = non_empty_env("DD_CI_JOB_URL");
        (name.is_some() || url.is_some()).then(|| JobInfo { name, url })
    };
    let pipeline = {
        let id = non_empty_env("DD_CI_PIPELINE_ID");
        let name = non_empty_env("DD_CI_PIPELINE_NAME");
        let number = non_empty_env("DD_CI_PIPELINE_NUMBER");
        let url = non_empty_env("DD_CI_PIPELINE_URL");
        (id.is_some() || name.is_some() || number.is_some() || url.is_some()).then(|| {
            PipelineInfo {
                id,
                name,
                number,
                url,
            }
        })
    };
    let provider = non_empty_env("DD_CI_PROVIDER_NAME").map(|name| ProviderInfo { name });
    let stage = non_empty_env("DD_CI_STAGE_NAME").map(|name| StageInfo { name });
    let workspace_path = non_empty_env("DD_CI_WORKSPACE_PATH");

    let info = CiInfo {
        job,
        pipeline,
        provider,
        stage,
        workspace_path,
    };
    (info.job.is_some()
        || info.pipeline.is_some()
        || info.provider.is_some()
        || info.stage.is_some()
        || info.workspace_path.is_some())
    .then_some(info)
}

fn commit_actor(role: &str) -> Option<CommitActor> {
    let name = non_empty_env(&format!("DD_GIT_COMMIT_{role}_NAME"));
    let email = non_empty_env(&format!("DD_GIT_COMMIT_{role}_EMAIL"));
    let date = non_empty_env(&format!("DD_GIT_COMMIT_{role}_DATE"));
    (name.is_some() || email.is_some() || date.is_some()).then(|| CommitActor { name, email, date })
}

fn git_info() -> Option<GitInfo> {
    let mut branch = None;
    let mut tag = None;

    if let Some(raw) = non_empty_env("DD_GIT_BRANCH") {
        match normalize_ref(&raw) {
            GitRef::Branch(name) => branch = Some(name),
            GitRef::Tag(name) => tag = Some(name),
        }
    }
    // An explicit tag always wins and clears the branch.
    if let Some(raw) = non_empty_env("DD_GIT_TAG") {
        tag = Some(match normalize_ref(&raw) {
            GitRef::Branch(name) | GitRef::Tag(name) => name,
        });
        branch = None;
    }

    let info = GitInfo {
        repository_url: non_empty_env("DD_GIT_REPOSITORY_URL"),
        commit_sha: non_empty_env("DD_GIT_COMMIT_SHA"),
        branch,
        tag,
        commit_message: non_empty_env("DD_GIT_COMMIT_MESSAGE"),
        commit_author: commit_actor("AUTHOR"),
        commit_committer: commit_actor("COMMITTER"),
    };
    (info.repository_url.is_some()
        || info.commit_sha.is_some()
        || info.branch.is_some()
        || info.tag.is_some()
        || info.commit_message.is_some()
        || info.commit_author.is_some()
        || info.commit_committer.is_some())
    .then_some(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_refs_strip_their_prefix() {
        assert_eq!(
            normalize_ref("refs/heads/main"),
            GitRef::Branch("main".to_string())
        );
        assert_eq!(
            normalize_ref("origin/feature/x"),
            GitRef::Branch("feature/x".to_string())
        );
        assert_eq!(
            normalize_ref("release/7.x"),
            GitRef::Branch("release/7.x".to_string())
        );
    }

    #[test]
    fn tag_namespaces_relocate_to_tag() {
        assert_eq!(
            normalize_ref("refs/tags/v1.0"),
            GitRef::Tag("v1.0".to_string())
        );
        assert_eq!(
            normalize_ref("origin/tags/v2.0"),
            GitRef::Tag("v2.0".to_string())
        );
        assert_eq!(
            normalize_ref("refs/heads/tags/v3.0"),
            GitRef::Tag("v3.0".to_string())
        );
    }

    #[test]
    fn empty_env_values_are_dropped() {
        // SAFETY: This is a test running in isolation; env var manipulation is acceptable.
        unsafe {
            std::env::set_var("DD_CI_STAGE_NAME", "");
        }
        assert_eq!(non_empty_env("DD_CI_STAGE_NAME"), None);
        // SAFETY: Cleanup after test.
        unsafe {
            std::env::remove_var("DD_CI_STAGE_NAME");
        }
    }

    #[test]
    fn explicit_tag_clears_branch() {
        // SAFETY: This is a test running in isolation; env var manipulation is acceptable.
        unsafe {
            std::env::set_var("DD_GIT_BRANCH", "refs/heads/main");
            std::env::set_var("DD_GIT_TAG", "refs/tags/v9.9");
        }
        let git = git_info().unwrap();
        assert_eq!(git.branch, None);
        assert_eq!(git.tag.as_deref(), Some("v9.9"));
        // SAFETY: Cleanup after test.
        unsafe {
            std::env::remove_var("DD_GIT_BRANCH");
            std::env::remove_var("DD_GIT_TAG");
        }
    }

    #[test]
    fn trigger_app_defaults_until_set() {
        assert_eq!(trigger_app(), DEFAULT_TRIGGER_APP);
        set_trigger_app("ci_orb");
        assert_eq!(trigger_app(), "ci_orb");
        // Reset the process-wide tag so other tests see the default again.
        *TRIGGER_APP.write().unwrap() = None;
    }
}
