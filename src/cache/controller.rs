//! Request-time cache decisions.
//!
//! For every request that resolved to a route carrying a policy, the controller walks
//! this state machine:
//!
//! ```text
//! write + invalidation policy ──► DROP keys on every backend ──┐
//!                                                              │
//! GET/HEAD + cache policy ──► no-store? ──yes──► BYPASS ───────┤
//!                               │ no                           │
//!                               ▼                              │
//!                         key generated? ──no──► BYPASS ───────┤
//!                               │ yes                          ├──► next
//!                               ▼                              │
//!                    no-cache? ──yes──► MISS ──┐               │
//!                               │ no           │               │
//!                               ▼              ▼               │
//!         fresh record ─► HIT   expired ─► EXPIRED ─► EXECUTE ─┘─► STORE
//! ```
//!
//! Storage and codec failures never reach the client. A failed read is a miss, a failed
//! write is logged and the fresh response is returned anyway.
//!
//! Concurrent misses for the same key are not coalesced: each one runs the handler and
//! writes its result, and the last write wins.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::{CacheSettings, ConfigError};
use super::control::CacheControl;
use super::index::{ResolvedRoute, RouteEntry, RouteIndex};
use super::key::{InvalidationTarget, KeyGenerator};
use super::policy::{CachePolicy, InvalidationPolicy, Visibility};
use super::record::{CacheRecord, SerializationError, Serializer};
use super::storage::{Backends, Storage};
use crate::context::Context;
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::Next;

/// Classification stamped on every response the controller produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOutcome {
    /// Served from a fresh record; the handler did not run.
    Hit,
    /// Nothing usable was stored; the handler ran.
    Miss,
    /// A record existed but was past its `max_age`; the handler ran. Only reported
    /// while the record is still held in storage, that is within
    /// [`CacheSettings::storage_ttl`]; after that the read is a [`Miss`](Self::Miss).
    Expired,
    /// Caching did not apply to this exchange.
    Bypass,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Expired => "EXPIRED",
            Self::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision engine behind [`CacheInterceptor`](super::CacheInterceptor).
///
/// Implement this to replace the built-in [`Controller`] wholesale; the interceptor
/// only resolves the route and delegates.
#[async_trait]
pub trait CacheController: Send + Sync {
    /// Produce the response for a request that resolved to `route`.
    async fn handle(&self, route: ResolvedRoute, ctx: Context, next: Next) -> Response;

    /// Check the built index against this controller's configuration. Called once,
    /// right after the index is built.
    fn validate(&self, _index: &RouteIndex) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Default [`CacheController`].
pub struct Controller {
    backends: Backends,
    serializer: Serializer,
    keys: KeyGenerator,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
}

impl Controller {
    pub fn new(backends: Backends) -> Self {
        let settings = CacheSettings::default();
        Self {
            backends,
            serializer: Serializer::from_settings(&settings),
            keys: KeyGenerator,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: CacheSettings) -> Self {
        self.serializer = Serializer::from_settings(&settings);
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    async fn read_through(
        &self,
        entry: &RouteEntry,
        policy: &CachePolicy,
        request_cc: CacheControl,
        ctx: Context,
        next: Next,
    ) -> (CacheOutcome, Response) {
        let key = match self.keys.generate(ctx.request(), policy) {
            Ok(key) => key,
            Err(e) => {
                warn!(route = entry.id(), error = %e, "cache key generation failed, bypassing");
                return (CacheOutcome::Bypass, next.run(ctx).await);
            }
        };
        let storage = self.backends.select(policy.backend_override());

        let mut outcome = CacheOutcome::Miss;
        if !request_cc.no_cache {
            let now = self.clock.now();
            match storage.get(&key).await {
                Ok(Some(record)) if record.is_fresh(now) => {
                    match self.serve_hit(&record, ctx.request(), now) {
                        Ok(response) => return (CacheOutcome::Hit, response),
                        Err(e) => {
                            warn!(
                                route = entry.id(),
                                key = %key,
                                error = %e,
                                "stored record unreadable, treating as miss"
                            );
                        }
                    }
                }
                Ok(Some(_)) => outcome = CacheOutcome::Expired,
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        route = entry.id(),
                        backend = storage.name(),
                        op = "get",
                        error = %e,
                        "cache read failed, treating as miss"
                    );
                }
            }
        }

        let response = next.run(ctx).await;
        self.store(entry, policy, &**storage, &key, &response).await;
        (outcome, response)
    }

    fn serve_hit(
        &self,
        record: &CacheRecord,
        request: &Request,
        now: SystemTime,
    ) -> Result<Response, SerializationError> {
        let response = self.serializer.decode(record)?;

        let revalidated = match (record.etag(), request.headers().get("if-none-match")) {
            (Some(etag), Some(candidates)) => etag_matches(candidates, etag),
            _ => false,
        };
        let mut response = if revalidated {
            not_modified(&response)
        } else {
            response
        };
        if request.method() == &Method::Head {
            response.clear_body();
        }
        response.set_header("Age", record.age(now).as_secs().to_string());
        Ok(response)
    }

    async fn store(
        &self,
        entry: &RouteEntry,
        policy: &CachePolicy,
        storage: &dyn Storage,
        key: &str,
        response: &Response,
    ) {
        let status = response.status().as_u16();
        if policy.max_age().is_zero() || !self.settings.is_cacheable_status(status) {
            debug!(route = entry.id(), key, status, "response not eligible for caching");
            return;
        }

        let response_cc = CacheControl::from_headers(response.headers());
        if response_cc.no_store {
            debug!(route = entry.id(), key, "response forbids storage");
            return;
        }
        if response_cc.private && policy.visibility() == Visibility::Public {
            debug!(route = entry.id(), key, "private response on a public route, not stored");
            return;
        }

        let record = match self
            .serializer
            .encode(key, response, policy.max_age(), self.clock.now())
        {
            Ok(record) => record,
            Err(e) => {
                warn!(route = entry.id(), key, error = %e, "response not representable, not cached");
                return;
            }
        };

        let ttl = self.settings.storage_ttl(policy.max_age());
        if let Err(e) = storage.set(key, record, ttl).await {
            warn!(
                route = entry.id(),
                backend = storage.name(),
                op = "set",
                error = %e,
                "cache write failed"
            );
        }
    }

    async fn invalidate(&self, entry: &RouteEntry, request: &Request, policy: &InvalidationPolicy) {
        let targets = match self.keys.invalidation_targets(request, policy) {
            Ok(targets) => targets,
            Err(e) => {
                warn!(route = entry.id(), error = %e, "could not derive invalidation targets");
                return;
            }
        };

        for target in &targets {
            for storage in self.backends.all() {
                let result = match target {
                    InvalidationTarget::Key(key) => storage.delete(key).await,
                    InvalidationTarget::Matching(pattern) => storage.delete_matching(pattern).await,
                };
                match result {
                    Ok(removed) => info!(
                        route = entry.id(),
                        backend = storage.name(),
                        target = %target,
                        removed,
                        "cache invalidated"
                    ),
                    Err(e) => warn!(
                        route = entry.id(),
                        backend = storage.name(),
                        op = "invalidate",
                        target = %target,
                        error = %e,
                        "cache invalidation failed"
                    ),
                }
            }
        }
    }
}

#[async_trait]
impl CacheController for Controller {
    async fn handle(&self, route: ResolvedRoute, mut ctx: Context, next: Next) -> Response {
        let ResolvedRoute { entry, params } = route;
        ctx.request_mut().set_path_params(params);

        let method = ctx.request().method().clone();
        let request_cc = CacheControl::from_headers(ctx.request().headers());

        // Dropped before the handler runs, so a failed write still invalidates.
        if let Some(policy) = entry.invalidation_policy().filter(|p| p.triggers_on(&method)) {
            self.invalidate(&entry, ctx.request(), policy).await;
        }

        let read_policy = entry
            .cache_policy()
            .filter(|_| method.is_cacheable() && !request_cc.no_store);
        let (outcome, mut response) = match read_policy {
            Some(policy) => {
                self.read_through(&entry, policy, request_cc, ctx, next)
                    .await
            }
            None => (CacheOutcome::Bypass, next.run(ctx).await),
        };

        debug!(route = entry.id(), %outcome, "cache outcome");
        response.set_header(self.settings.outcome_header.as_str(), outcome.as_str());
        response
    }

    fn validate(&self, index: &RouteIndex) -> Result<(), ConfigError> {
        for entry in index.entries() {
            let backend = entry.cache_policy().and_then(CachePolicy::backend_override);
            if let Some(backend) = backend {
                if !self.backends.contains(backend) {
                    return Err(ConfigError::UnknownBackend {
                        route: entry.id().to_string(),
                        backend: backend.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("backends", &self.backends)
            .field("clock", &self.clock)
            .field("settings", &self.settings)
            .finish()
    }
}

// `If-None-Match` carries a list of entity tags or `*`; comparison is weak.
fn etag_matches(candidates: &str, etag: &str) -> bool {
    let strip = |tag: &str| -> String { tag.trim().trim_start_matches("W/").to_string() };
    let etag = strip(etag);
    candidates
        .split(',')
        .any(|candidate| candidate.trim() == "*" || strip(candidate) == etag)
}

fn not_modified(cached: &Response) -> Response {
    let mut response = Response::new(StatusCode::NotModified);
    for (name, value) in cached.headers().iter() {
        if !name.eq_ignore_ascii_case("content-type") {
            response.add_header(name, value);
        }
    }
    response
}
