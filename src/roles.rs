//! Role parsing and the authenticated principal.
//!
//! The token authority reports roles as one colon separated string
//! (`"ADMIN:USER"`).  The pipeline turns that into an ordered list of
//! `ROLE_` prefixed authorities attached to the request's [`Principal`].

use serde::Serialize;

use crate::error::{ErrorBody, ERROR_ACCESS_DENIED};

pub const ROLE_DELIMITER: char = ':';
pub const ROLE_PREFIX: &str = "ROLE_";
pub const DEFAULT_ROLE: &str = "USER";

/// A normalized permission label such as `ROLE_ADMIN`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Authority(String);

impl Authority {
    /// Build an authority from a bare or already prefixed role name.
    pub fn from_role(role: &str) -> Self {
        if role.starts_with(ROLE_PREFIX) {
            Self(role.to_string())
        } else {
            Self(format!("{ROLE_PREFIX}{role}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a role string on `:`; parts are trimmed and empties dropped.  Order
/// and duplicates are kept.
pub fn parse_roles(role_string: Option<&str>) -> Vec<String> {
    let Some(raw) = role_string else {
        return Vec::new();
    };
    let roles: Vec<String> = raw
        .split(ROLE_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    tracing::debug!(count = roles.len(), ?roles, "parsed roles");
    roles
}

/// Convert roles to authorities.  No roles means exactly one `ROLE_USER`.
pub fn to_authorities(roles: &[String]) -> Vec<Authority> {
    if roles.is_empty() {
        return vec![Authority::from_role(DEFAULT_ROLE)];
    }
    roles.iter().map(|r| Authority::from_role(r)).collect()
}

pub fn parse_authorities(role_string: Option<&str>) -> Vec<Authority> {
    to_authorities(&parse_roles(role_string))
}

/// The authenticated caller, installed by the authentication stage and
/// available to handlers through request extensions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject: Option<String>,
    pub authorities: Vec<Authority>,
}

impl Principal {
    pub fn new(subject: Option<String>, authorities: Vec<Authority>) -> Self {
        Self {
            subject,
            authorities,
        }
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        let wanted = Authority::from_role(authority);
        self.authorities.contains(&wanted)
    }

    /// Authorization check for handlers past the pipeline.  Missing authority
    /// yields the uniform 403 body.
    pub fn require_authority(&self, authority: &str, path: &str) -> Result<(), ErrorBody> {
        if self.has_authority(authority) {
            return Ok(());
        }
        tracing::warn!(
            subject = ?self.subject,
            required = %authority,
            path = %path,
            "access denied"
        );
        Err(ErrorBody::forbidden(ERROR_ACCESS_DENIED, path))
    }
}
