use super::{RequestContext, RequestHead, Stage, StageOutcome};
use crate::diagnostics::{DiagnosticKey, DiagnosticScope};
use crate::error::{ErrorBody, ERROR_MISSING_ORIGIN_HEADERS};
use crate::util::{header_text, ExclusionRules};

pub const ORIGIN_SERVICE_HEADER: &str = "Atradius-Origin-Service";
pub const ORIGIN_APPLICATION_HEADER: &str = "Atradius-Origin-Application";
pub const ORIGIN_USER_HEADER: &str = "Atradius-Origin-User";

/// Header name and the diagnostic key it is published under.
const ORIGIN_HEADERS: [(&str, DiagnosticKey); 3] = [
    (ORIGIN_SERVICE_HEADER, DiagnosticKey::OriginService),
    (ORIGIN_APPLICATION_HEADER, DiagnosticKey::OriginApplication),
    (ORIGIN_USER_HEADER, DiagnosticKey::UserIdHeader),
];

const OWNED_KEYS: [DiagnosticKey; 3] = [
    DiagnosticKey::OriginService,
    DiagnosticKey::OriginApplication,
    DiagnosticKey::UserIdHeader,
];

/// Validates the trust-boundary origin headers and publishes them into the
/// diagnostic context.  In strict mode a blank header rejects the request
/// with 400; otherwise missing headers are only logged.
pub struct OriginHeaderStage {
    exclusions: ExclusionRules,
    strict_mode: bool,
}

impl OriginHeaderStage {
    pub fn new(exclusions: ExclusionRules, strict_mode: bool) -> Self {
        Self {
            exclusions,
            strict_mode,
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclusions.is_excluded(path)
    }
}

#[async_trait::async_trait]
impl Stage for OriginHeaderStage {
    fn name(&self) -> &str {
        "origin_headers"
    }

    async fn handle(&self, head: &RequestHead, ctx: &mut RequestContext) -> StageOutcome {
        let path = head.path.as_str();
        if self.is_excluded(path) {
            tracing::info!(path = %path, "path excluded, skipping origin header validation");
            return StageOutcome::Continue(DiagnosticScope::empty());
        }

        let values = ORIGIN_HEADERS.map(|(name, key)| (name, key, header_text(&head.headers, name)));
        let missing: Vec<&str> = values
            .iter()
            .filter(|(_, _, value)| value.is_none())
            .map(|(name, _, _)| *name)
            .collect();

        if !missing.is_empty() {
            if self.strict_mode {
                tracing::warn!(path = %path, ?missing, "missing required origin headers");
                return StageOutcome::Reject(ErrorBody::bad_request(
                    ERROR_MISSING_ORIGIN_HEADERS,
                    path,
                ));
            }
            tracing::debug!(path = %path, ?missing, "origin headers incomplete (advisory mode)");
        }

        let mut scope = ctx.diagnostics.scope(&OWNED_KEYS);
        for (_, key, value) in values {
            if let Some(value) = value {
                scope.put(key, value);
            }
        }
        tracing::debug!(path = %path, "origin headers passed");
        StageOutcome::Continue(scope)
    }
}
