//! Utility helpers for gatehouse.
//!
//! This module exposes the small pure functions shared by the pipeline
//! stages: exclusion path matching, header text extraction and bearer token
//! handling.  None of these helpers perform I/O.

use std::sync::Arc;

use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;

/// Suffix turning a pattern into a prefix wildcard (`/actuator/**`).
const WILDCARD_SUFFIX: &str = "/**";

/// Header carrying the credential.
pub const AUTHORIZATION: &str = "authorization";

/// Header forwarded to the token authority as an identity-domain hint.
pub const IDENTITY_DOMAIN_HEADER: &str = "X-OAUTH-IDENTITY-DOMAIN-NAME";

/// Basic JWT shape: header.payload.signature.  This is a format check only;
/// it exists to avoid a network round trip for input that can never be a
/// token.
static JWT_SHAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9\-_=]+\.[A-Za-z0-9\-_=]+\.[A-Za-z0-9\-_.+/=]*$").unwrap()
});

/// Returns true when `path` falls under `pattern`.
///
/// * `"/actuator/**"` matches every path starting with `"/actuator"`.
/// * `"/api/health"` matches `"/api/health"` and `"/api/health/..."` but not
///   `"/api/healthz"`.
pub fn matches(path: &str, pattern: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(WILDCARD_SUFFIX) {
        return path.starts_with(prefix);
    }
    path == pattern
        || path
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Returns true when any of `patterns` matches `path`.  An empty list never
/// excludes anything.
pub fn is_excluded(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| matches(path, pattern))
}

/// Ordered exclusion patterns built once at startup.  Cloning shares the
/// underlying list, so every stage built from the same value evaluates the
/// exact same patterns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionRules {
    patterns: Arc<[String]>,
}

impl ExclusionRules {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        is_excluded(path, &self.patterns)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Header value as trimmed text; `None` when absent, not visible ASCII, or
/// blank.
pub fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Extract the token from a `Bearer <token>` authorization value.  The scheme
/// is matched case-insensitively; a missing or blank token yields `None`.
pub fn extract_bearer_token(raw: &str) -> Option<&str> {
    let raw = raw.trim_start();
    if raw.len() < 7 || !raw.is_char_boundary(6) || !raw[..6].eq_ignore_ascii_case("bearer") {
        return None;
    }
    let rest = &raw[6..];
    if !rest.starts_with(' ') {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

/// Returns true when `token` looks like a compact JWT.
pub fn has_jwt_shape(token: &str) -> bool {
    JWT_SHAPE_RE.is_match(token)
}
