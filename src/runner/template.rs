//! `{{ NAME }}` substitution for `startUrl` overrides.
//!
//! The lookup context is the process environment merged with reserved keys
//! derived from the test's own request URL. Reserved keys win over the
//! environment; collisions are reported as warnings. A request URL that
//! fails to parse degrades to the environment-only context with an error
//! diagnostic. Placeholders that resolve to nothing are left verbatim.

use std::collections::HashMap;
use std::env;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use url::Url;

/// The reserved keys derived from the test's request URL.
pub const RESERVED_KEYS: [&str; 11] = [
    "URL",
    "DOMAIN",
    "HASH",
    "HOST",
    "HOSTNAME",
    "ORIGIN",
    "PARAMS",
    "PATHNAME",
    "PORT",
    "PROTOCOL",
    "SUBDOMAIN",
];

static TEMPLATE_RE: OnceLock<Regex> = OnceLock::new();

fn template_re() -> &'static Regex {
    TEMPLATE_RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid template regex"))
}

/// A rendered `startUrl` plus the diagnostics produced on the way.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub url: String,
    /// Reserved-key collisions with the environment.
    pub warnings: Vec<String>,
    /// Non-fatal degradations, e.g. an unparseable request URL.
    pub errors: Vec<String>,
}

/// Renders a `startUrl` template against the environment and the reserved
/// keys derived from `test_url`.
pub fn render_start_url(template: &str, test_url: &str) -> Rendered {
    let mut context: HashMap<String, String> = env::vars().collect();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    match url_context(test_url) {
        Ok(reserved) => {
            for (key, value) in reserved {
                if context.contains_key(&key) {
                    warnings.push(format!(
                        "environment variable {key} is shadowed by the test URL value"
                    ));
                }
                context.insert(key, value);
            }
        }
        Err(parse_error) => {
            errors.push(format!(
                "could not parse test URL {test_url}: {parse_error}; \
                 only environment variables are available to the start URL template"
            ));
        }
    }

    Rendered {
        url: render(template, &context),
        warnings,
        errors,
    }
}

/// Substitutes `{{ NAME }}` placeholders from `context`, leaving unresolved
/// ones verbatim.
pub fn render(template: &str, context: &HashMap<String, String>) -> String {
    template_re()
        .replace_all(template, |caps: &Captures<'_>| {
            context
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Derives the reserved-key context from a request URL.
fn url_context(test_url: &str) -> Result<HashMap<String, String>, url::ParseError> {
    let url = Url::parse(test_url)?;

    let hostname = url.host_str().unwrap_or_default().to_string();
    let host = match url.port() {
        Some(port) => format!("{hostname}:{port}"),
        None => hostname.clone(),
    };
    let (domain, subdomain) = split_subdomain(&hostname);

    let mut context = HashMap::new();
    context.insert("URL".to_string(), test_url.to_string());
    context.insert("DOMAIN".to_string(), domain);
    if let Some(subdomain) = subdomain {
        context.insert("SUBDOMAIN".to_string(), subdomain);
    }
    context.insert(
        "HASH".to_string(),
        url.fragment().map(|f| format!("#{f}")).unwrap_or_default(),
    );
    context.insert("HOST".to_string(), host);
    context.insert("HOSTNAME".to_string(), hostname);
    context.insert("ORIGIN".to_string(), url.origin().ascii_serialization());
    context.insert(
        "PARAMS".to_string(),
        url.query().map(|q| format!("?{q}")).unwrap_or_default(),
    );
    context.insert("PATHNAME".to_string(), url.path().to_string());
    context.insert(
        "PORT".to_string(),
        url.port().map(|p| p.to_string()).unwrap_or_default(),
    );
    context.insert("PROTOCOL".to_string(), format!("{}:", url.scheme()));
    Ok(context)
}

/// Splits the left-most host label off as the subdomain, but only when the
/// host has at least three labels and a 2-5 character TLD. Anything else is
/// kept whole.
fn split_subdomain(hostname: &str) -> (String, Option<String>) {
    let labels: Vec<&str> = hostname.split('.').collect();
    let tld_len = labels.last().map(|tld| tld.len()).unwrap_or(0);
    if labels.len() >= 3 && (2..=5).contains(&tld_len) {
        (labels[1..].join("."), Some(labels[0].to_string()))
    } else {
        (hostname.to_string(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_for(url: &str) -> HashMap<String, String> {
        url_context(url).unwrap()
    }

    #[test]
    fn renders_reserved_keys_from_the_test_url() {
        let context = context_for("https://api.shop.example.com/v1");
        let rendered = render(
            "{{PROTOCOL}}//{{SUBDOMAIN}}.staging.{{DOMAIN}}{{PATHNAME}}",
            &context,
        );
        assert_eq!(rendered, "https://api.staging.shop.example.com/v1");
    }

    #[test]
    fn tolerates_whitespace_inside_braces() {
        let context = context_for("https://api.shop.example.com/v1");
        assert_eq!(
            render("{{ HOSTNAME }}{{  PATHNAME  }}", &context),
            "api.shop.example.com/v1"
        );
    }

    #[test]
    fn unresolved_placeholders_stay_verbatim() {
        let context = HashMap::new();
        assert_eq!(
            render("https://{{NOPE}}/x/{{ALSO_NOPE}}", &context),
            "https://{{NOPE}}/x/{{ALSO_NOPE}}"
        );
    }

    #[test]
    fn two_label_hosts_have_no_subdomain() {
        let context = context_for("https://example.com/");
        assert_eq!(context.get("DOMAIN").map(String::as_str), Some("example.com"));
        assert!(!context.contains_key("SUBDOMAIN"));
    }

    #[test]
    fn port_params_and_hash_follow_the_url() {
        let context = context_for("http://web.example.org:8080/a/b?x=1&y=2#frag");
        assert_eq!(context.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(context.get("HOST").map(String::as_str), Some("web.example.org:8080"));
        assert_eq!(context.get("PARAMS").map(String::as_str), Some("?x=1&y=2"));
        assert_eq!(context.get("HASH").map(String::as_str), Some("#frag"));
        assert_eq!(
            context.get("ORIGIN").map(String::as_str),
            Some("http://web.example.org:8080")
        );
    }

    #[test]
    fn reserved_keys_shadow_the_environment_with_a_warning() {
        // SAFETY: This is a test running in isolation; env var manipulation is acceptable.
        unsafe {
            std::env::set_var("SUBDOMAIN", "ignored");
        }
        let rendered = render_start_url(
            "{{PROTOCOL}}//{{SUBDOMAIN}}.staging.{{DOMAIN}}{{PATHNAME}}",
            "https://api.shop.example.com/v1",
        );
        assert_eq!(rendered.url, "https://api.staging.shop.example.com/v1");
        assert!(
            rendered
                .warnings
                .iter()
                .any(|warning| warning.contains("SUBDOMAIN"))
        );
        // SAFETY: Cleanup after test.
        unsafe {
            std::env::remove_var("SUBDOMAIN");
        }
    }

    #[test]
    fn unparseable_test_url_degrades_to_environment_only() {
        // SAFETY: This is a test running in isolation; env var manipulation is acceptable.
        unsafe {
            std::env::set_var("TEMPLATE_FALLBACK_HOST", "fallback.example.net");
        }
        let rendered = render_start_url("https://{{TEMPLATE_FALLBACK_HOST}}/", "not a url");
        assert_eq!(rendered.url, "https://fallback.example.net/");
        assert_eq!(rendered.errors.len(), 1);
        // SAFETY: Cleanup after test.
        unsafe {
            std::env::remove_var("TEMPLATE_FALLBACK_HOST");
        }
    }

    #[test]
    fn empty_reserved_values_resolve_to_empty_strings() {
        let context = context_for("https://example.com/");
        assert_eq!(render("p={{PORT}}h={{HASH}}", &context), "p=h=");
    }
}
