//! Configuration loading.
//!
//! Run configuration lives in a TOML file (`synthrun.toml` by default).
//! Credential fields support `${VAR}` / `${VAR:-default}` environment
//! references so that API keys never have to be written into the file;
//! suite files themselves are JSON and are handled by [`crate::suite`].

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads configuration from a TOML file and expands environment references
/// in the credential fields.
///
/// # Errors
///
/// Fails when the file cannot be read, is not valid TOML, or references a
/// required environment variable that is not set.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    load_config_str(&content)
        .with_context(|| format!("failed to load config file: {}", path.display()))
}

/// Loads configuration from a TOML string. Useful for tests and for
/// embedding configuration programmatically.
pub fn load_config_str(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("failed to parse config")?;

    config.backend.api_key = expand_env_value(&config.backend.api_key)
        .map_err(|e| anyhow::anyhow!("in backend.api_key: {e}"))?;
    config.backend.app_key = expand_env_value(&config.backend.app_key)
        .map_err(|e| anyhow::anyhow!("in backend.app_key: {e}"))?;

    Ok(config)
}

/// Expands environment references in a string value.
///
/// Syntax:
/// - `${VAR}` - required, fails if VAR is not set
/// - `${VAR:-default}` - optional, uses "default" if VAR not set
/// - `$$` - escaped dollar sign (becomes a single `$`)
fn expand_env_value(value: &str) -> Result<String, String> {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(dollar) = rest.find('$') {
        expanded.push_str(&rest[..dollar]);
        rest = &rest[dollar + 1..];

        if let Some(tail) = rest.strip_prefix('$') {
            expanded.push('$');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('{') {
            let close = tail
                .find('}')
                .ok_or_else(|| format!("unclosed variable reference: ${{{tail}"))?;
            let (reference, after) = (&tail[..close], &tail[close + 1..]);

            let (name, fallback) = match reference.find(":-") {
                Some(idx) => (&reference[..idx], Some(&reference[idx + 2..])),
                None => (reference, None),
            };
            if name.is_empty() {
                return Err("empty variable name in ${}".to_string());
            }

            match std::env::var(name) {
                Ok(found) => expanded.push_str(&found),
                Err(_) => match fallback {
                    Some(fallback) => expanded.push_str(fallback),
                    None => return Err(format!("required environment variable not set: {name}")),
                },
            }
            rest = after;
        } else {
            // A lone $ is kept as-is.
            expanded.push('$');
        }
    }

    expanded.push_str(rest);
    Ok(expanded)
}
