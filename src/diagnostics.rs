//! Per-request diagnostic context.
//!
//! A [`DiagnosticContext`] holds the request-scoped identity fields (origin
//! headers, token subject, client, domain) that logging and audit code tag
//! their output with.  One context is created per request.  Stages never
//! write into it directly: they open a [`DiagnosticScope`] declaring the keys
//! they own, and dropping the scope removes exactly those keys.  Because the
//! driver keeps the scopes alive only for the duration of the downstream
//! call, the keys disappear on every exit path, panics included.
//!
//! Code running inside the request's task can reach the context without
//! threading it through arguments via [`current`]; the task-local binding ends
//! with the downstream future, so a reused worker never observes a previous
//! request's entries.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

tokio::task_local! {
    static CURRENT: DiagnosticContext;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DiagnosticKey {
    OriginService,
    OriginApplication,
    UserIdHeader,
    UserIdToken,
    Client,
    Domain,
}

impl DiagnosticKey {
    pub const ALL: [DiagnosticKey; 6] = [
        DiagnosticKey::OriginService,
        DiagnosticKey::OriginApplication,
        DiagnosticKey::UserIdHeader,
        DiagnosticKey::UserIdToken,
        DiagnosticKey::Client,
        DiagnosticKey::Domain,
    ];

    /// Key name as exposed to log consumers.
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKey::OriginService => "originService",
            DiagnosticKey::OriginApplication => "originApplication",
            DiagnosticKey::UserIdHeader => "userIdHeader",
            DiagnosticKey::UserIdToken => "userIdToken",
            DiagnosticKey::Client => "client",
            DiagnosticKey::Domain => "domain",
        }
    }

    /// Field name on the per-request tracing span.
    pub fn span_field(self) -> &'static str {
        match self {
            DiagnosticKey::OriginService => "origin_service",
            DiagnosticKey::OriginApplication => "origin_application",
            DiagnosticKey::UserIdHeader => "user_id_header",
            DiagnosticKey::UserIdToken => "user_id_token",
            DiagnosticKey::Client => "client",
            DiagnosticKey::Domain => "domain",
        }
    }
}

/// Shared handle to one request's diagnostic entries.  Clones observe the
/// same entries.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticContext {
    entries: Arc<Mutex<BTreeMap<DiagnosticKey, String>>>,
}

impl DiagnosticContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<DiagnosticKey, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: DiagnosticKey) -> Option<String> {
        self.lock().get(&key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Copy of the current entries keyed by their log names.
    pub fn snapshot(&self) -> BTreeMap<&'static str, String> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect()
    }

    /// Open a write scope owning `keys`.  Every owned key is removed when the
    /// scope is dropped, whether or not it was written.
    pub fn scope(&self, keys: &[DiagnosticKey]) -> DiagnosticScope {
        DiagnosticScope {
            ctx: Some(self.clone()),
            owned: keys.to_vec(),
        }
    }

    /// Record every present entry onto `span`.  The span must declare the
    /// fields named by [`DiagnosticKey::span_field`].
    pub fn record_on(&self, span: &tracing::Span) {
        for (key, value) in self.lock().iter() {
            span.record(key.span_field(), value.as_str());
        }
    }
}

/// Guard over the keys one stage owns in a [`DiagnosticContext`].
#[derive(Debug)]
#[must_use = "dropping the scope removes its entries immediately"]
pub struct DiagnosticScope {
    ctx: Option<DiagnosticContext>,
    owned: Vec<DiagnosticKey>,
}

impl DiagnosticScope {
    /// A scope owning nothing, for stages that pass a request through.
    pub fn empty() -> Self {
        Self {
            ctx: None,
            owned: Vec::new(),
        }
    }

    /// Write `value` under `key` when it is non-blank.  Writes to keys the
    /// scope does not own are ignored.
    pub fn put(&mut self, key: DiagnosticKey, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        if !self.owned.contains(&key) {
            tracing::warn!(key = key.as_str(), "write to unowned diagnostic key ignored");
            return;
        }
        if let Some(ctx) = &self.ctx {
            ctx.lock().insert(key, value.to_string());
            tracing::debug!(key = key.as_str(), "added diagnostic entry");
        }
    }

    pub fn owned_keys(&self) -> &[DiagnosticKey] {
        &self.owned
    }

    /// Remove the owned entries now.  Equivalent to dropping the scope.
    pub fn release(self) {}
}

impl Drop for DiagnosticScope {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            let mut entries = ctx.lock();
            for key in &self.owned {
                entries.remove(key);
            }
        }
    }
}

/// The diagnostic context of the request whose task is currently running,
/// if any.
pub fn current() -> Option<DiagnosticContext> {
    CURRENT.try_with(DiagnosticContext::clone).ok()
}

/// Shorthand for reading a single entry of [`current`].
pub fn current_value(key: DiagnosticKey) -> Option<String> {
    current().and_then(|ctx| ctx.get(key))
}

/// Run `fut` with `ctx` bound as the task's current diagnostic context.
pub async fn scope_current<F>(ctx: DiagnosticContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(ctx, fut).await
}
