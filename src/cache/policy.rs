//! Per-route caching and invalidation policies.
//!
//! Policies are attached to routes at registration time as opaque [`RoutePolicy`]
//! objects. The route index asks each one what it is through
//! [`RoutePolicy::classify`], so applications can wrap or derive policies from their
//! own configuration types without the engine knowing about them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::key::{DefaultKey, KeyFunction, KeyTemplate, path_regex_pattern};
use super::storage::KeyPattern;
use crate::http::Method;

/// Who a cached entry may be served to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Shared across principals.
    #[default]
    Public,
    /// Per principal. The key function must include a principal discriminator.
    Private,
}

/// Enables caching of GET/HEAD responses on a route.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_cache::cache::{CachePolicy, DefaultKey, PrincipalKey, Visibility};
///
/// let public = CachePolicy::new(Duration::from_secs(300));
/// assert_eq!(public.visibility(), Visibility::Public);
///
/// let per_user = CachePolicy::private(Duration::from_secs(60))
///     .with_key(PrincipalKey::new(DefaultKey, "X-User-Id"))
///     .with_backend("sessions");
/// assert_eq!(per_user.backend_override(), Some("sessions"));
/// ```
#[derive(Clone)]
pub struct CachePolicy {
    max_age: Duration,
    visibility: Visibility,
    key_function: Arc<dyn KeyFunction>,
    backend_override: Option<String>,
}

impl CachePolicy {
    /// A public policy keyed by [`DefaultKey`].
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            visibility: Visibility::Public,
            key_function: Arc::new(DefaultKey),
            backend_override: None,
        }
    }

    pub fn private(max_age: Duration) -> Self {
        Self::new(max_age).with_visibility(Visibility::Private)
    }

    #[must_use]
    pub fn with_key(mut self, key_function: impl KeyFunction + 'static) -> Self {
        self.key_function = Arc::new(key_function);
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Store entries for this route in the named backend instead of the default one.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend_override = Some(backend.into());
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn key_function(&self) -> &dyn KeyFunction {
        self.key_function.as_ref()
    }

    pub fn backend_override(&self) -> Option<&str> {
        self.backend_override.as_deref()
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("max_age", &self.max_age)
            .field("visibility", &self.visibility)
            .field(
                "key_template",
                &self.key_function.template().map(KeyTemplate::as_str),
            )
            .field("backend_override", &self.backend_override)
            .finish()
    }
}

/// A path-based invalidation target.
#[derive(Debug, Clone)]
pub enum PathMatch {
    /// Cached paths starting with the rendered template.
    Prefix(KeyTemplate),
    /// Cached paths matched by a regular expression.
    Pattern { source: String, keys: KeyPattern },
}

/// Drops cached entries when a write request reaches a route.
///
/// # Examples
///
/// ```
/// use rttp_cache::cache::InvalidationPolicy;
/// use rttp_cache::http::Method;
///
/// let policy = InvalidationPolicy::new()
///     .with_key_template("data_{id}")
///     .with_prefix("/data/{id}/")
///     .on_methods([Method::Put, Method::Delete]);
///
/// assert!(policy.triggers_on(&Method::Delete));
/// assert!(!policy.triggers_on(&Method::Post));
/// ```
#[derive(Debug, Clone)]
pub struct InvalidationPolicy {
    path_matchers: Vec<PathMatch>,
    key_template: Option<KeyTemplate>,
    triggering_methods: Vec<Method>,
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationPolicy {
    /// Triggers on POST, PUT, PATCH and DELETE with no targets yet.
    pub fn new() -> Self {
        Self {
            path_matchers: Vec::new(),
            key_template: None,
            triggering_methods: vec![Method::Post, Method::Put, Method::Patch, Method::Delete],
        }
    }

    /// Drop cached GET/HEAD entries whose path starts with `prefix`. Placeholders are
    /// filled from the write request's path parameters.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.path_matchers
            .push(PathMatch::Prefix(KeyTemplate::parse(prefix)));
        self
    }

    /// Drop cached GET/HEAD entries whose path matches `pattern`.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        let keys = path_regex_pattern(pattern)?;
        self.path_matchers.push(PathMatch::Pattern {
            source: pattern.to_string(),
            keys,
        });
        Ok(self)
    }

    /// Drop the key rendered from `template`. A `*` in the result deletes every key the
    /// glob matches.
    #[must_use]
    pub fn with_key_template(mut self, template: &str) -> Self {
        self.key_template = Some(KeyTemplate::parse(template));
        self
    }

    /// Replace the set of methods that trigger invalidation.
    #[must_use]
    pub fn on_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.triggering_methods = methods.into_iter().collect();
        self
    }

    pub fn triggers_on(&self, method: &Method) -> bool {
        self.triggering_methods.contains(method)
    }

    pub fn path_matchers(&self) -> &[PathMatch] {
        &self.path_matchers
    }

    pub fn key_template(&self) -> Option<&KeyTemplate> {
        self.key_template.as_ref()
    }

    pub fn triggering_methods(&self) -> &[Method] {
        &self.triggering_methods
    }

    /// Every template whose placeholders must be declared by the owning route.
    pub(crate) fn templates(&self) -> impl Iterator<Item = &KeyTemplate> {
        self.path_matchers
            .iter()
            .filter_map(|m| match m {
                PathMatch::Prefix(template) => Some(template),
                PathMatch::Pattern { .. } => None,
            })
            .chain(self.key_template.as_ref())
    }
}

/// What a policy object turned out to be.
#[derive(Debug, Clone)]
pub enum PolicyKind {
    Cache(CachePolicy),
    Invalidation(InvalidationPolicy),
}

impl PolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cache(_) => "cache",
            Self::Invalidation(_) => "invalidation",
        }
    }
}

/// An object attached to a route.
///
/// Returning `None` from [`classify`](Self::classify) marks the object as unrelated to
/// caching; the index ignores it.
///
/// ```
/// use std::time::Duration;
/// use rttp_cache::cache::{CachePolicy, PolicyKind, RoutePolicy};
///
/// /// An application-level annotation that happens to imply caching.
/// struct Hot { seconds: u64 }
///
/// impl RoutePolicy for Hot {
///     fn classify(&self) -> Option<PolicyKind> {
///         Some(PolicyKind::Cache(CachePolicy::new(Duration::from_secs(self.seconds))))
///     }
/// }
///
/// assert!(matches!(Hot { seconds: 5 }.classify(), Some(PolicyKind::Cache(_))));
/// ```
pub trait RoutePolicy: Send + Sync {
    fn classify(&self) -> Option<PolicyKind>;
}

impl RoutePolicy for CachePolicy {
    fn classify(&self) -> Option<PolicyKind> {
        Some(PolicyKind::Cache(self.clone()))
    }
}

impl RoutePolicy for InvalidationPolicy {
    fn classify(&self) -> Option<PolicyKind> {
        Some(PolicyKind::Invalidation(self.clone()))
    }
}

impl RoutePolicy for PolicyKind {
    fn classify(&self) -> Option<PolicyKind> {
        Some(self.clone())
    }
}
