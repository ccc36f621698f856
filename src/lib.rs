//! Core library for gatehouse.  This module wires the security pipeline
//! into an axum router: a middleware runs the stages in front of every
//! route, and handlers read the authenticated principal back out of the
//! request.

mod config;
pub mod diagnostics;
pub mod error;
pub mod roles;
pub mod stages;
pub mod util;
pub mod validation;

pub use config::{AppConfig, SecurityConfig};
pub use diagnostics::{DiagnosticContext, DiagnosticKey, DiagnosticScope};
pub use error::ErrorBody;
pub use roles::{Authority, Principal};
pub use stages::{RequestContext, RequestHead, SecurityPipeline, Stage, StageOutcome};
pub use validation::{HttpTokenValidator, TokenClaims, TokenValidationError, TokenValidator};

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::error::ERROR_AUTHENTICATION_REQUIRED;

/// State shared by the middleware and handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: SecurityPipeline,
    pub config: Arc<AppConfig>,
}

/// Build state around an explicit validator.  Hosts and tests use this to
/// substitute the token authority.
pub fn build_state_with_validator(config: AppConfig, validator: Arc<dyn TokenValidator>) -> AppState {
    let pipeline = SecurityPipeline::from_config(&config.security, validator);
    tracing::info!(
        stages = ?pipeline.stage_names(),
        excluded = ?config.security.excluded_paths,
        strict_header_mode = config.security.strict_header_mode,
        "security pipeline configured"
    );
    AppState {
        pipeline,
        config: Arc::new(config),
    }
}

/// Build state from environment variables, see [`AppConfig::from_env`].
/// The token authority is reached over HTTP at
/// `SECURITY_TOKEN_VALIDATION_URL`.
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    let validator = HttpTokenValidator::new(
        &config.security.token_validation_url,
        config.security.validation_timeout(),
    )?;
    Ok(build_state_with_validator(config, Arc::new(validator)))
}

/// Runs the security pipeline in front of the wrapped routes.  Every request
/// gets its own [`DiagnosticContext`]; on success the principal (if any) and
/// the context are placed in the request extensions.
pub async fn security_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let (parts, body) = req.into_parts();
    let head = RequestHead::new(parts.method.clone(), parts.uri.path(), parts.headers.clone());
    state
        .pipeline
        .process(&head, DiagnosticContext::new(), move |ctx| async move {
            let mut req = Request::from_parts(parts, body);
            req.extensions_mut().insert(ctx.diagnostics);
            if let Some(principal) = ctx.principal {
                req.extensions_mut().insert(principal);
            }
            next.run(req).await
        })
        .await
}

/// Extractor for handlers that need an authenticated caller.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = ErrorBody;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Principal>() {
            Some(principal) => Ok(Authenticated(principal.clone())),
            None => {
                tracing::warn!(path = %parts.uri.path(), "no authenticated principal");
                Err(ErrorBody::unauthorized(
                    ERROR_AUTHENTICATION_REQUIRED,
                    parts.uri.path(),
                ))
            }
        }
    }
}

/// Build the axum router.  The security middleware wraps every route;
/// excluded paths pass through it untouched.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/actuator/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route("/api/whoami", get(whoami_handler))
        .route("/api/admin", get(admin_handler))
        .layer(middleware::from_fn_with_state(state.clone(), security_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let json = serde_json::json!({
        "status": "UP",
        "stages": state.pipeline.stage_names(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

async fn whoami_handler(Authenticated(principal): Authenticated) -> Response {
    let diagnostics = diagnostics::current()
        .map(|ctx| ctx.snapshot())
        .unwrap_or_default();
    tracing::info!(subject = ?principal.subject, "whoami");
    let json = serde_json::json!({
        "principal": principal,
        "diagnostics": diagnostics,
    });
    (StatusCode::OK, Json(json)).into_response()
}

async fn admin_handler(Authenticated(principal): Authenticated, uri: Uri) -> Response {
    if let Err(denied) = principal.require_authority("ADMIN", uri.path()) {
        return denied.into_response();
    }
    let json = serde_json::json!({
        "status": "ok",
        "subject": principal.subject,
    });
    (StatusCode::OK, Json(json)).into_response()
}
