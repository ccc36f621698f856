use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_TOKEN_VALIDATION_URL: &str = "http://localhost:8090/oauth2/rest/token/info";
pub const DEFAULT_EXCLUDED_PATHS: [&str; 2] = ["/actuator/**", "/api/health"];
pub const DEFAULT_VALIDATION_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_PORT: u16 = 8080;

/// Switches and endpoints for the security pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    #[serde(alias = "jwtEnabled")]
    pub jwt_enabled: bool,
    #[serde(alias = "headersEnabled")]
    pub headers_enabled: bool,
    #[serde(alias = "strictHeaderMode")]
    pub strict_header_mode: bool,
    #[serde(alias = "tokenValidationUrl")]
    pub token_validation_url: String,
    #[serde(alias = "excludedPaths")]
    pub excluded_paths: Vec<String>,
    #[serde(alias = "validationTimeoutMs")]
    pub validation_timeout_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_enabled: true,
            headers_enabled: true,
            strict_header_mode: false,
            token_validation_url: DEFAULT_TOKEN_VALIDATION_URL.to_string(),
            excluded_paths: DEFAULT_EXCLUDED_PATHS.iter().map(|p| p.to_string()).collect(),
            validation_timeout_ms: DEFAULT_VALIDATION_TIMEOUT_MS,
        }
    }
}

impl SecurityConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub security: SecurityConfig,
    pub port: u16,
}

impl AppConfig {
    /// Load `GATEHOUSE_CONFIG` (if set), then apply `SECURITY_*` and `PORT`
    /// overrides from the environment.
    pub fn from_env() -> Result<Self> {
        let mut security = if let Ok(path) = env::var("GATEHOUSE_CONFIG") {
            let content = fs::read_to_string(&path).with_context(|| {
                format!("Failed to read GATEHOUSE_CONFIG '{}': file unreadable", path)
            })?;
            serde_json::from_str::<SecurityConfig>(&content).with_context(|| {
                format!(
                    "Failed to parse GATEHOUSE_CONFIG '{}': invalid JSON configuration",
                    path
                )
            })?
        } else {
            SecurityConfig::default()
        };

        if let Some(v) = parse_bool_env("SECURITY_JWT_ENABLED")? {
            security.jwt_enabled = v;
        }
        if let Some(v) = parse_bool_env("SECURITY_HEADERS_ENABLED")? {
            security.headers_enabled = v;
        }
        if let Some(v) = parse_bool_env("SECURITY_STRICT_HEADER_MODE")? {
            security.strict_header_mode = v;
        }
        if let Some(url) = non_blank_env("SECURITY_TOKEN_VALIDATION_URL") {
            security.token_validation_url = url;
        }
        if let Ok(raw) = env::var("SECURITY_EXCLUDED_PATHS") {
            // an explicitly empty value clears the list
            security.excluded_paths = raw
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
        }
        if let Some(ms) = parse_optional_u64("SECURITY_VALIDATION_TIMEOUT_MS")? {
            security.validation_timeout_ms = ms;
        }
        // merged value, so a zero from the config file is rejected as well
        if security.validation_timeout_ms == 0 {
            return Err(anyhow!(
                "SECURITY_VALIDATION_TIMEOUT_MS (validationTimeoutMs) must be greater than zero"
            ));
        }

        let port = match parse_optional_u64("PORT")? {
            Some(p) => u16::try_from(p).map_err(|_| anyhow!("PORT must be a valid TCP port"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self { security, port })
    }
}

fn non_blank_env(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
