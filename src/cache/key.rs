//! Cache key derivation.
//!
//! A [`KeyFunction`] turns a request into the storage key of its cached response. The
//! default layout is `METHOD:path:canonical-query`, with query parameters sorted so that
//! `?a=1&b=2` and `?b=2&a=1` share one entry. Path-based invalidation relies on that
//! layout, so keys produced by custom functions are only reachable through an
//! invalidation key template.

use std::fmt;

use regex::Regex;
use thiserror::Error;

use super::policy::{CachePolicy, InvalidationPolicy, PathMatch};
use super::storage::KeyPattern;
use crate::context::PathParams;
use crate::http::Request;
use crate::router::pattern::trim_trailing_slash;

/// Errors raised while deriving keys. The controller treats them as a bypass.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("path parameter `{name}` is not present on the request")]
    MissingParam { name: String },

    #[error("principal header `{header}` is missing from the request")]
    MissingPrincipal { header: String },

    #[error("key function produced an empty key")]
    Empty,

    #[error("invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("{0}")]
    Custom(String),
}

/// Computes the cache key for a request.
///
/// Any `Fn(&Request) -> Result<String, KeyError>` is a key function. Implementations
/// must be deterministic for identical input. For PRIVATE policies the key must include
/// something that identifies the principal; the engine does not add it on its own.
///
/// # Examples
///
/// ```
/// use rttp_cache::cache::{KeyError, KeyFunction};
/// use rttp_cache::http::{Method, Request};
///
/// let by_tenant = |req: &Request| -> Result<String, KeyError> {
///     let tenant = req.headers().get("x-tenant").unwrap_or("shared");
///     Ok(format!("{tenant}:{}", req.path()))
/// };
///
/// let req = Request::new(Method::Get, "/report").header("X-Tenant", "acme");
/// assert_eq!(by_tenant.generate(&req).unwrap(), "acme:/report");
/// ```
pub trait KeyFunction: Send + Sync {
    fn generate(&self, request: &Request) -> Result<String, KeyError>;

    /// The placeholder template behind this key, when there is one. Lets the route
    /// index reject templates naming parameters the route does not declare.
    fn template(&self) -> Option<&KeyTemplate> {
        None
    }
}

impl<F> KeyFunction for F
where
    F: Fn(&Request) -> Result<String, KeyError> + Send + Sync,
{
    fn generate(&self, request: &Request) -> Result<String, KeyError> {
        (self)(request)
    }
}

/// `METHOD:path:canonical-query`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKey;

impl KeyFunction for DefaultKey {
    fn generate(&self, request: &Request) -> Result<String, KeyError> {
        Ok(default_key(request))
    }
}

/// Renders a [`KeyTemplate`] from the request's path parameters.
#[derive(Debug, Clone)]
pub struct TemplateKey {
    template: KeyTemplate,
}

impl TemplateKey {
    pub fn new(template: &str) -> Self {
        Self {
            template: KeyTemplate::parse(template),
        }
    }
}

impl KeyFunction for TemplateKey {
    fn generate(&self, request: &Request) -> Result<String, KeyError> {
        self.template.render(request.path_params())
    }

    fn template(&self) -> Option<&KeyTemplate> {
        Some(&self.template)
    }
}

/// Appends a per-principal discriminator, read from a request header, to another key.
///
/// Requests without the header fail key generation and therefore bypass the cache,
/// so anonymous traffic never shares an entry with an authenticated principal.
#[derive(Debug, Clone)]
pub struct PrincipalKey<K> {
    inner: K,
    header: String,
}

impl<K: KeyFunction> PrincipalKey<K> {
    pub fn new(inner: K, header: impl Into<String>) -> Self {
        Self {
            inner,
            header: header.into(),
        }
    }
}

impl<K: KeyFunction> KeyFunction for PrincipalKey<K> {
    fn generate(&self, request: &Request) -> Result<String, KeyError> {
        let principal = request
            .headers()
            .get(&self.header)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| KeyError::MissingPrincipal {
                header: self.header.clone(),
            })?;
        Ok(format!("{}:{principal}", self.inner.generate(request)?))
    }

    fn template(&self) -> Option<&KeyTemplate> {
        self.inner.template()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Param(String),
}

/// A string with `{name}` placeholders filled from path parameters.
///
/// Parsing is lenient: a `{` without a matching `}` (or `{}`) is kept as literal text.
/// A `*` in the rendered output turns an invalidation target into a glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    raw: String,
    parts: Vec<Part>,
}

impl KeyTemplate {
    pub fn parse(raw: &str) -> Self {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if close > 0 && !after[..close].contains('{') => {
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Param(after[..close].to_string()));
                    rest = &after[close + 1..];
                }
                _ => {
                    literal.push('{');
                    rest = after;
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names referenced by the template, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Param(name) => Some(name.as_str()),
            Part::Literal(_) => None,
        })
    }

    pub fn render(&self, params: &PathParams) -> Result<String, KeyError> {
        let mut out = String::with_capacity(self.raw.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Param(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| KeyError::MissingParam { name: name.clone() })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One storage operation produced by an invalidation policy.
#[derive(Debug, Clone)]
pub enum InvalidationTarget {
    /// Remove exactly this key.
    Key(String),
    /// Remove every key the pattern matches.
    Matching(KeyPattern),
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Matching(pattern) => pattern.fmt(f),
        }
    }
}

/// Derives read keys and invalidation targets from requests and policies.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator;

impl KeyGenerator {
    /// Key under which the response to `request` is cached.
    pub fn generate(&self, request: &Request, policy: &CachePolicy) -> Result<String, KeyError> {
        let key = policy.key_function().generate(request)?;
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(key)
    }

    /// Everything a write matching `policy` must remove, in declaration order:
    /// path matchers first, then the key template.
    pub fn invalidation_targets(
        &self,
        request: &Request,
        policy: &InvalidationPolicy,
    ) -> Result<Vec<InvalidationTarget>, KeyError> {
        let params = request.path_params();
        let mut targets = Vec::with_capacity(policy.path_matchers().len() + 1);

        for matcher in policy.path_matchers() {
            let pattern = match matcher {
                PathMatch::Prefix(template) => path_prefix_pattern(&template.render(params)?)?,
                PathMatch::Pattern { keys, .. } => keys.clone(),
            };
            targets.push(InvalidationTarget::Matching(pattern));
        }

        if let Some(template) = policy.key_template() {
            let key = template.render(params)?;
            if key.contains('*') {
                targets.push(InvalidationTarget::Matching(KeyPattern::glob(&key)?));
            } else if !key.is_empty() {
                targets.push(InvalidationTarget::Key(key));
            }
        }

        Ok(targets)
    }
}

/// The default key for `request`. A trailing slash is dropped, as the router does when
/// matching, so `/items/` and `/items` share an entry.
pub fn default_key(request: &Request) -> String {
    format!(
        "{}:{}:{}",
        request.method(),
        trim_trailing_slash(request.path()),
        canonical_query(request.query_params())
    )
}

/// Query parameters sorted by name (then value) and re-joined.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

// Default keys start with the method, so path matching has to skip over it.
const READ_METHODS: &str = "(?:GET|HEAD):";

/// Pattern over default keys whose path starts with `prefix`.
pub(crate) fn path_prefix_pattern(prefix: &str) -> Result<KeyPattern, regex::Error> {
    KeyPattern::regex(&format!("^{READ_METHODS}{}", regex::escape(prefix)))
}

/// Pattern over default keys whose path matches `path_regex`.
///
/// The expression is anchored at the start of the path; a trailing `$` is rewritten to
/// the separator that ends the path inside a key.
pub(crate) fn path_regex_pattern(path_regex: &str) -> Result<KeyPattern, regex::Error> {
    let body = path_regex.strip_prefix('^').unwrap_or(path_regex);
    let (body, end) = match body.strip_suffix('$') {
        Some(body) => (body, ":"),
        None => (body, ""),
    };
    // Validate the user's expression on its own so errors point at it, not our wrapper.
    Regex::new(body)?;
    KeyPattern::regex(&format!("^{READ_METHODS}(?:{body}){end}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Method;

    fn with_params(mut req: Request, pairs: &[(&str, &str)]) -> Request {
        req.set_path_params(pairs.iter().copied().collect());
        req
    }

    #[test]
    fn default_key_sorts_query() {
        let a = Request::new(Method::Get, "/items?b=2&a=1");
        let b = Request::new(Method::Get, "/items?a=1&b=2");
        assert_eq!(default_key(&a), "GET:/items:a=1&b=2");
        assert_eq!(default_key(&a), default_key(&b));
    }

    #[test]
    fn default_key_distinguishes_method_and_path() {
        let get = Request::new(Method::Get, "/items");
        let head = Request::new(Method::Head, "/items");
        let other = Request::new(Method::Get, "/items/1");
        assert_eq!(default_key(&get), "GET:/items:");
        assert_ne!(default_key(&get), default_key(&head));
        assert_ne!(default_key(&get), default_key(&other));
    }

    #[test]
    fn default_key_ignores_trailing_slash() {
        let bare = Request::new(Method::Get, "/items");
        let slashed = Request::new(Method::Get, "/items/?page=1");
        assert_eq!(default_key(&bare), "GET:/items:");
        assert_eq!(default_key(&slashed), "GET:/items:page=1");
        assert_eq!(default_key(&Request::new(Method::Get, "/")), "GET:/:");
    }

    #[test]
    fn canonical_query_orders_duplicate_names_by_value() {
        let req = Request::new(Method::Get, "/s?tag=b&tag=a");
        assert_eq!(canonical_query(req.query_params()), "tag=a&tag=b");
    }

    #[test]
    fn template_parse_and_render() {
        let t = KeyTemplate::parse("user_{id}_post_{post}");
        assert_eq!(t.placeholders().collect::<Vec<_>>(), vec!["id", "post"]);
        let params: PathParams = [("id", "7"), ("post", "9")].into_iter().collect();
        assert_eq!(t.render(&params).unwrap(), "user_7_post_9");
    }

    #[test]
    fn template_lenient_braces() {
        let t = KeyTemplate::parse("a{}b{c");
        assert_eq!(t.placeholders().count(), 0);
        assert_eq!(t.render(&PathParams::new()).unwrap(), "a{}b{c");
    }

    #[test]
    fn template_missing_param() {
        let t = KeyTemplate::parse("data_{id}");
        let err = t.render(&PathParams::new()).unwrap_err();
        assert!(matches!(err, KeyError::MissingParam { name } if name == "id"));
    }

    #[test]
    fn principal_key_requires_header() {
        let key = PrincipalKey::new(DefaultKey, "X-User-Id");
        let anonymous = Request::new(Method::Get, "/me");
        assert!(matches!(
            key.generate(&anonymous),
            Err(KeyError::MissingPrincipal { .. })
        ));

        let alice = Request::new(Method::Get, "/me").header("X-User-Id", "alice");
        let bob = Request::new(Method::Get, "/me").header("X-User-Id", "bob");
        assert_eq!(key.generate(&alice).unwrap(), "GET:/me::alice");
        assert_ne!(key.generate(&alice).unwrap(), key.generate(&bob).unwrap());
    }

    #[test]
    fn generator_rejects_empty_keys() {
        let policy = CachePolicy::new(Duration::from_secs(1))
            .with_key(|_req: &Request| -> Result<String, KeyError> { Ok(String::new()) });
        let err = KeyGenerator
            .generate(&Request::new(Method::Get, "/"), &policy)
            .unwrap_err();
        assert!(matches!(err, KeyError::Empty));
    }

    #[test]
    fn generator_uses_template_key() {
        let policy = CachePolicy::new(Duration::from_secs(1)).with_key(TemplateKey::new("data_{id}"));
        let req = with_params(Request::new(Method::Get, "/data/42"), &[("id", "42")]);
        assert_eq!(KeyGenerator.generate(&req, &policy).unwrap(), "data_42");
    }

    #[test]
    fn invalidation_targets_cover_paths_and_template() {
        let policy = InvalidationPolicy::new()
            .with_prefix("/data/{id}")
            .with_pattern(r"^/reports/\d+$")
            .unwrap()
            .with_key_template("data_{id}");
        let req = with_params(Request::new(Method::Post, "/data/42"), &[("id", "42")]);

        let targets = KeyGenerator.invalidation_targets(&req, &policy).unwrap();
        assert_eq!(targets.len(), 3);

        let InvalidationTarget::Matching(prefix) = &targets[0] else {
            panic!("expected a pattern, got {:?}", targets[0]);
        };
        assert!(prefix.matches("GET:/data/42:"));
        assert!(prefix.matches("HEAD:/data/42/comments:page=2"));
        assert!(!prefix.matches("GET:/data/7:"));
        assert!(!prefix.matches("POST:/data/42:"));

        let InvalidationTarget::Matching(reports) = &targets[1] else {
            panic!("expected a pattern, got {:?}", targets[1]);
        };
        assert!(reports.matches("GET:/reports/12:"));
        assert!(!reports.matches("GET:/reports/12/raw:"));

        assert!(matches!(&targets[2], InvalidationTarget::Key(k) if k == "data_42"));
    }

    #[test]
    fn wildcard_template_becomes_glob() {
        let policy = InvalidationPolicy::new().with_key_template("user_{id}_*");
        let req = with_params(Request::new(Method::Delete, "/users/5"), &[("id", "5")]);
        let targets = KeyGenerator.invalidation_targets(&req, &policy).unwrap();
        let InvalidationTarget::Matching(glob) = &targets[0] else {
            panic!("expected a glob, got {:?}", targets[0]);
        };
        assert!(glob.matches("user_5_profile"));
        assert!(!glob.matches("user_50_profile"));
    }

    #[test]
    fn bad_path_regex_is_rejected() {
        assert!(path_regex_pattern("/reports/(").is_err());
    }
}
