//! Startup-built lookup from `(method, path)` to a route's caching policies.
//!
//! The index walks every route the host exposes through [`RouteSource`], classifies the
//! attached policy objects once, and keeps the result read-only for the lifetime of the
//! process. Resolution is a linear scan in registration order; route tables are small
//! compared to request volume and each match is a handful of string comparisons.

use std::sync::Arc;

use tracing::info;

use super::config::ConfigError;
use super::key::KeyTemplate;
use super::policy::{CachePolicy, InvalidationPolicy, PolicyKind, RoutePolicy};
use crate::context::PathParams;
use crate::http::Method;
use crate::router::PathMatcher;

/// One route as seen by the index. Borrowed from the host; never mutated.
#[derive(Clone)]
pub struct RouteDescriptor<'a> {
    pub method: Method,
    pub path_template: &'a str,
    pub policies: &'a [Arc<dyn RoutePolicy>],
}

/// Anything that can enumerate registered routes, typically the host router.
pub trait RouteSource: Send + Sync {
    /// All routes, in registration order.
    fn routes(&self) -> Vec<RouteDescriptor<'_>>;
}

/// A route with its compiled matcher and classified policies.
#[derive(Debug)]
pub struct RouteEntry {
    id: String,
    method: Method,
    matcher: PathMatcher,
    cache_policy: Option<CachePolicy>,
    invalidation_policy: Option<InvalidationPolicy>,
}

impl RouteEntry {
    /// `"METHOD template"`, used to name the route in logs and errors.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    pub fn cache_policy(&self) -> Option<&CachePolicy> {
        self.cache_policy.as_ref()
    }

    pub fn invalidation_policy(&self) -> Option<&InvalidationPolicy> {
        self.invalidation_policy.as_ref()
    }

    /// `true` if the route carries no caching-related policy at all.
    pub fn is_passthrough(&self) -> bool {
        self.cache_policy.is_none() && self.invalidation_policy.is_none()
    }

    fn from_descriptor(route: &RouteDescriptor<'_>) -> Result<Self, ConfigError> {
        let matcher = PathMatcher::parse(route.path_template);
        let id = format!("{} {}", route.method, route.path_template);

        let mut cache_policy = None;
        let mut invalidation_policy = None;
        for kind in route.policies.iter().filter_map(|p| p.classify()) {
            let duplicate = match kind {
                PolicyKind::Cache(policy) => cache_policy.replace(policy).map(|_| "cache"),
                PolicyKind::Invalidation(policy) => {
                    invalidation_policy.replace(policy).map(|_| "invalidation")
                }
            };
            if let Some(kind) = duplicate {
                return Err(ConfigError::DuplicatePolicy { route: id, kind });
            }
        }

        let entry = Self {
            id,
            method: route.method.clone(),
            matcher,
            cache_policy,
            invalidation_policy,
        };
        entry.check_placeholders()?;
        Ok(entry)
    }

    // Every placeholder must name a parameter the route's template captures, otherwise
    // the key could never be rendered at request time.
    fn check_placeholders(&self) -> Result<(), ConfigError> {
        let read = self
            .cache_policy
            .iter()
            .filter_map(|p| p.key_function().template());
        let write = self
            .invalidation_policy
            .iter()
            .flat_map(InvalidationPolicy::templates);

        for template in read.chain(write) {
            if let Some(missing) = self.undeclared(template) {
                return Err(ConfigError::UnknownPlaceholder {
                    route: self.id.clone(),
                    placeholder: missing.to_string(),
                });
            }
        }
        Ok(())
    }

    fn undeclared<'t>(&self, template: &'t KeyTemplate) -> Option<&'t str> {
        template
            .placeholders()
            .find(|name| !self.matcher.declares(name))
    }
}

/// The route a request resolved to, with the parameters its path captured.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub entry: Arc<RouteEntry>,
    pub params: PathParams,
}

/// Ordered, immutable table of [`RouteEntry`]s.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_cache::{Method, Response, Router, StatusCode};
/// use rttp_cache::cache::{CachePolicy, RouteIndex};
///
/// let mut router = Router::new();
/// router
///     .get("/data/{id}", |_ctx| async { Response::new(StatusCode::Ok) })
///     .policy(CachePolicy::new(Duration::from_secs(300)));
///
/// let index = RouteIndex::build(&router).unwrap();
/// let resolved = index.resolve(&Method::Get, "/data/42").unwrap();
/// assert_eq!(resolved.entry.id(), "GET /data/{id}");
/// assert_eq!(resolved.params.get("id"), Some("42"));
/// assert!(index.resolve(&Method::Post, "/data/42").is_none());
/// ```
#[derive(Debug, Default)]
pub struct RouteIndex {
    entries: Vec<Arc<RouteEntry>>,
}

impl RouteIndex {
    /// Classify and validate every route. Fails on the first malformed route.
    pub fn build(source: &dyn RouteSource) -> Result<Self, ConfigError> {
        let entries = source
            .routes()
            .iter()
            .map(|route| RouteEntry::from_descriptor(route).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let cached = entries.iter().filter(|e| e.cache_policy.is_some()).count();
        let invalidating = entries
            .iter()
            .filter(|e| e.invalidation_policy.is_some())
            .count();
        info!(
            routes = entries.len(),
            cached, invalidating, "cache route index built"
        );

        Ok(Self { entries })
    }

    /// First entry, in registration order, whose method and path both match.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<ResolvedRoute> {
        self.entries
            .iter()
            .filter(|entry| &entry.method == method)
            .find_map(|entry| {
                entry.matcher.matches(path).map(|params| ResolvedRoute {
                    entry: Arc::clone(entry),
                    params,
                })
            })
    }

    pub fn entries(&self) -> &[Arc<RouteEntry>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::key::TemplateKey;
    use crate::http::Response;
    use crate::{Router, StatusCode};

    async fn ok(_ctx: crate::context::Context) -> Response {
        Response::new(StatusCode::Ok)
    }

    fn minutes(n: u64) -> Duration {
        Duration::from_secs(n * 60)
    }

    #[test]
    fn classifies_policies_per_route() {
        let mut router = Router::new();
        router.get("/health", ok);
        router
            .get("/data/{id}", ok)
            .policy(CachePolicy::new(minutes(5)));
        router
            .post("/data/{id}", ok)
            .policy(InvalidationPolicy::new().with_key_template("data_{id}"));

        let index = RouteIndex::build(&router).unwrap();
        assert_eq!(index.len(), 3);

        let health = &index.entries()[0];
        assert!(health.is_passthrough());

        let get = index.resolve(&Method::Get, "/data/1").unwrap();
        assert!(get.entry.cache_policy().is_some());
        assert!(get.entry.invalidation_policy().is_none());

        let post = index.resolve(&Method::Post, "/data/1").unwrap();
        assert!(post.entry.invalidation_policy().is_some());
        assert_eq!(post.params.get("id"), Some("1"));
    }

    #[test]
    fn dual_purpose_route_keeps_both() {
        let mut router = Router::new();
        router
            .get("/feed", ok)
            .policy(CachePolicy::new(minutes(1)))
            .policy(InvalidationPolicy::new().with_prefix("/feed/"));
        let index = RouteIndex::build(&router).unwrap();
        let entry = &index.entries()[0];
        assert!(entry.cache_policy().is_some());
        assert!(entry.invalidation_policy().is_some());
    }

    #[test]
    fn first_registered_match_wins() {
        let mut router = Router::new();
        router
            .get("/items/special", ok)
            .policy(CachePolicy::new(minutes(10)));
        router.get("/items/{id}", ok).policy(CachePolicy::new(minutes(1)));

        let index = RouteIndex::build(&router).unwrap();
        let special = index.resolve(&Method::Get, "/items/special").unwrap();
        assert_eq!(special.entry.id(), "GET /items/special");
        let other = index.resolve(&Method::Get, "/items/3").unwrap();
        assert_eq!(other.entry.id(), "GET /items/{id}");
    }

    #[test]
    fn unknown_path_resolves_to_nothing() {
        let mut router = Router::new();
        router.get("/a", ok);
        let index = RouteIndex::build(&router).unwrap();
        assert!(index.resolve(&Method::Get, "/b").is_none());
    }

    #[test]
    fn rejects_undeclared_placeholder_in_key_template() {
        let mut router = Router::new();
        router
            .post("/data/{id}", ok)
            .policy(InvalidationPolicy::new().with_key_template("data_{slug}"));

        match RouteIndex::build(&router) {
            Err(ConfigError::UnknownPlaceholder { route, placeholder }) => {
                assert_eq!(route, "POST /data/{id}");
                assert_eq!(placeholder, "slug");
            }
            other => panic!("expected UnknownPlaceholder, got {other:?}"),
        }
    }

    #[test]
    fn rejects_undeclared_placeholder_in_prefix_and_key_function() {
        let mut router = Router::new();
        router
            .delete("/users/{id}", ok)
            .policy(InvalidationPolicy::new().with_prefix("/orgs/{org}/users"));
        assert!(matches!(
            RouteIndex::build(&router),
            Err(ConfigError::UnknownPlaceholder { .. })
        ));

        let mut router = Router::new();
        router
            .get("/users", ok)
            .policy(CachePolicy::new(minutes(1)).with_key(TemplateKey::new("user_{id}")));
        assert!(matches!(
            RouteIndex::build(&router),
            Err(ConfigError::UnknownPlaceholder { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_policy_kind() {
        let mut router = Router::new();
        router
            .get("/x", ok)
            .policy(CachePolicy::new(minutes(1)))
            .policy(CachePolicy::new(minutes(2)));
        assert!(matches!(
            RouteIndex::build(&router),
            Err(ConfigError::DuplicatePolicy { kind: "cache", .. })
        ));

        let mut router = Router::new();
        router
            .post("/x", ok)
            .policy(InvalidationPolicy::new())
            .policy(InvalidationPolicy::new());
        assert!(matches!(
            RouteIndex::build(&router),
            Err(ConfigError::DuplicatePolicy { kind: "invalidation", .. })
        ));
    }

    #[test]
    fn unrelated_policy_objects_are_ignored() {
        struct RateLimit;
        impl RoutePolicy for RateLimit {
            fn classify(&self) -> Option<PolicyKind> {
                None
            }
        }

        let mut router = Router::new();
        router.get("/x", ok).policy(RateLimit);
        let index = RouteIndex::build(&router).unwrap();
        assert!(index.entries()[0].is_passthrough());
    }

    #[test]
    fn build_is_repeatable() {
        let mut router = Router::new();
        router.get("/a/{id}", ok).policy(CachePolicy::new(minutes(1)));
        let first = RouteIndex::build(&router).unwrap();
        let second = RouteIndex::build(&router).unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(router.len(), 1);
    }
}
