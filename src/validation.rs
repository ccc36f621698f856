//! Token validation against the external authority.
//!
//! The pipeline never inspects token signatures itself.  It hands the bearer
//! token to a [`TokenValidator`]; the HTTP implementation performs
//! `GET <url>?access_token=<token>` and maps every failure to a
//! [`TokenValidationError`] carrying a message safe to show callers.

use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::util::IDENTITY_DOMAIN_HEADER;

pub const ERROR_EMPTY_VALIDATION_RESPONSE: &str = "Empty response from security-service";
pub const ERROR_TOKEN_VALIDATION_FAILED: &str = "Token validation failed";

/// Claims reported by the authority for a valid token.  Every field is
/// optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "iss")]
    pub issuer: Option<String>,
    #[serde(rename = "aud", default, deserialize_with = "string_list")]
    pub audience: Vec<String>,
    #[serde(rename = "exp")]
    pub expires_at: Option<i64>,
    #[serde(rename = "jti")]
    pub token_id: Option<String>,
    #[serde(rename = "iat")]
    pub issued_at: Option<i64>,
    #[serde(rename = "sub")]
    pub subject: Option<String>,
    pub client: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub scope: Vec<String>,
    pub domain: Option<String>,
    #[serde(rename = "v")]
    pub version: Option<String>,
    /// Colon separated roles, e.g. `"ADMIN:USER"`.
    #[serde(rename = "userRole")]
    pub role_string: Option<String>,
}

/// Accepts `null`, a single string or an array of strings.
fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Why a token was not accepted.  `Display` yields the caller-facing message;
/// transport and decode details are kept for logs only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenValidationError {
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("Empty response from security-service")]
    EmptyResponse,
    #[error("Token validation failed")]
    Transport { detail: String },
    #[error("Token validation failed")]
    Decode { detail: String },
}

impl TokenValidationError {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[async_trait::async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(
        &self,
        token: &str,
        identity_domain: Option<&str>,
    ) -> Result<TokenClaims, TokenValidationError>;
}

/// Status-keyed fallback messages.
pub fn status_message(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Invalid or expired token",
        403 => "Access forbidden",
        404 => "Resource not found",
        500 => "Internal server error",
        503 => "Service unavailable",
        _ => "Request failed",
    }
}

/// Caller-facing message for a failed validation response.  Prefers
/// `error_description`, then a humanized `error` code, then the status
/// default.  Never fails.
pub fn extract_error_message(status: u16, body: &str) -> String {
    message_from_body(body).unwrap_or_else(|| status_message(status).to_string())
}

fn message_from_body(body: &str) -> Option<String> {
    // both field names contain "error"; skip the parse for bodies that can't match
    if !body.contains("error") {
        return None;
    }
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(err) => {
            tracing::debug!(error = %err, "could not parse error response, using default message");
            return None;
        }
    };
    let obj = value.as_object()?;
    if let Some(description) = text_field(obj, "error_description")? {
        return Some(description.to_string());
    }
    text_field(obj, "error")?.map(humanize_error_code)
}

/// `Some(None)` for an absent, null or blank field; `None` when the field has
/// a non-string type, which abandons body parsing altogether.
fn text_field<'a>(obj: &'a serde_json::Map<String, Value>, name: &str) -> Option<Option<&'a str>> {
    match obj.get(name) {
        None | Some(Value::Null) => Some(None),
        Some(Value::String(s)) if s.trim().is_empty() => Some(None),
        Some(Value::String(s)) => Some(Some(s.as_str())),
        Some(_) => None,
    }
}

/// `"invalid_token"` becomes `"Invalid token"`.
fn humanize_error_code(code: &str) -> String {
    let spaced = code.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Decode a successful validation body.
pub fn decode_claims(body: &str) -> Result<TokenClaims, TokenValidationError> {
    if body.trim().is_empty() {
        return Err(TokenValidationError::EmptyResponse);
    }
    match serde_json::from_str::<Option<TokenClaims>>(body) {
        Ok(Some(claims)) => Ok(claims),
        Ok(None) => Err(TokenValidationError::EmptyResponse),
        Err(err) => Err(TokenValidationError::Decode {
            detail: err.to_string(),
        }),
    }
}

/// [`TokenValidator`] calling the authority's token info endpoint over HTTP.
/// Timeouts surface as transport failures; no retries are attempted.
pub struct HttpTokenValidator {
    url: Url,
    client: reqwest::Client,
}

impl HttpTokenValidator {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid token validation URL '{}'", url))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build token validation HTTP client")?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn request_url(&self, token: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("access_token", token);
        url
    }
}

#[async_trait::async_trait]
impl TokenValidator for HttpTokenValidator {
    async fn validate(
        &self,
        token: &str,
        identity_domain: Option<&str>,
    ) -> Result<TokenClaims, TokenValidationError> {
        tracing::debug!(url = %self.url, "validating token with authority");
        let mut rb = self.client.get(self.request_url(token));
        if let Some(domain) = identity_domain.map(str::trim).filter(|d| !d.is_empty()) {
            rb = rb.header(IDENTITY_DOMAIN_HEADER, domain);
        }
        let resp = match rb.send().await {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(error = ?err, "token validation transport error");
                return Err(TokenValidationError::Transport {
                    detail: err.to_string(),
                });
            }
        };
        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(status = status.as_u16(), error = ?err, "token validation read error");
                return Err(TokenValidationError::Transport {
                    detail: err.to_string(),
                });
            }
        };
        if !status.is_success() {
            let message = extract_error_message(status.as_u16(), &text);
            tracing::warn!(status = status.as_u16(), message = %message, "token rejected by authority");
            return Err(TokenValidationError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let claims = decode_claims(&text).inspect_err(|err| {
            tracing::warn!(error = ?err, "token validation response unusable");
        })?;
        tracing::debug!(subject = ?claims.subject, user_role = ?claims.role_string, "token validated");
        Ok(claims)
    }
}
