//! Stage infrastructure for gatehouse.
//!
//! Each stage encapsulates one security concern.  The `SecurityPipeline`
//! runs the registered stages in order and stops at the first rejection.
//! Stages that continue hand back a [`DiagnosticScope`]; the pipeline keeps
//! those scopes alive while the protected handler runs and releases them,
//! innermost first, once it returns.

use std::future::Future;
use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use crate::config::SecurityConfig;
use crate::diagnostics::{self, DiagnosticContext, DiagnosticScope};
use crate::error::ErrorBody;
use crate::roles::Principal;
use crate::util::ExclusionRules;
use crate::validation::TokenValidator;

pub mod authentication;
pub mod origin_headers;

use self::authentication::AuthenticationStage;
use self::origin_headers::OriginHeaderStage;

/// The request elements the stages look at.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
        }
    }
}

/// Per-request state threaded through the stages and handed to the
/// downstream handler.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub diagnostics: DiagnosticContext,
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn new(diagnostics: DiagnosticContext) -> Self {
        Self {
            diagnostics,
            principal: None,
        }
    }
}

/// What a stage decided about the request.
#[derive(Debug)]
pub enum StageOutcome {
    /// Proceed to the next stage.  The scope owns the diagnostic entries the
    /// stage wrote and must outlive the downstream call.
    Continue(DiagnosticScope),
    /// Stop and answer with this body.
    Reject(ErrorBody),
}

/// Trait implemented by all pipeline stages.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, head: &RequestHead, ctx: &mut RequestContext) -> StageOutcome;
}

/// Ordered stage list.  Registration order is execution order.
#[derive(Clone, Default)]
pub struct SecurityPipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl SecurityPipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Build the standard pipeline: origin headers first, then
    /// authentication.  Disabled stages are left out; both stages share one
    /// set of exclusion rules.
    pub fn from_config(cfg: &SecurityConfig, validator: Arc<dyn TokenValidator>) -> Self {
        let exclusions = ExclusionRules::new(cfg.excluded_paths.iter().cloned());
        let mut stages: Vec<Arc<dyn Stage>> = Vec::new();
        if cfg.headers_enabled {
            stages.push(Arc::new(OriginHeaderStage::new(
                exclusions.clone(),
                cfg.strict_header_mode,
            )));
        } else {
            tracing::info!("origin header stage disabled");
        }
        if cfg.jwt_enabled {
            stages.push(Arc::new(AuthenticationStage::new(exclusions, validator)));
        } else {
            tracing::info!("authentication stage disabled");
        }
        Self { stages }
    }

    /// Number of registered stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no registered stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage against `head`, then `downstream` if none rejected.
    ///
    /// `diagnostics` is the request's context; the middleware creates a fresh
    /// one per request.  Whatever happens (rejection, downstream error,
    /// panic) the stages' entries are gone from it when this future finishes
    /// or is dropped.
    pub async fn process<F, Fut>(
        &self,
        head: &RequestHead,
        diagnostics: DiagnosticContext,
        downstream: F,
    ) -> Response
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Response>,
    {
        let span = tracing::info_span!(
            "request",
            method = %head.method,
            path = %head.path,
            origin_service = tracing::field::Empty,
            origin_application = tracing::field::Empty,
            user_id_header = tracing::field::Empty,
            user_id_token = tracing::field::Empty,
            client = tracing::field::Empty,
            domain = tracing::field::Empty,
        );
        self.process_in_span(head, diagnostics, downstream, span.clone())
            .instrument(span)
            .await
    }

    async fn process_in_span<F, Fut>(
        &self,
        head: &RequestHead,
        diagnostics: DiagnosticContext,
        downstream: F,
        span: tracing::Span,
    ) -> Response
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Response>,
    {
        let mut ctx = RequestContext::new(diagnostics.clone());
        let mut scopes: Vec<DiagnosticScope> = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            tracing::trace!(stage = %stage.name(), "evaluating stage");
            match stage.handle(head, &mut ctx).await {
                StageOutcome::Continue(scope) => scopes.push(scope),
                StageOutcome::Reject(body) => {
                    tracing::info!(stage = %stage.name(), status = body.status, "request rejected");
                    release(scopes);
                    return body.into_response();
                }
            }
        }
        diagnostics.record_on(&span);
        let response = diagnostics::scope_current(diagnostics, downstream(ctx)).await;
        release(scopes);
        response
    }
}

/// Release scopes innermost first, mirroring stage nesting.
fn release(mut scopes: Vec<DiagnosticScope>) {
    while let Some(scope) = scopes.pop() {
        scope.release();
    }
}
