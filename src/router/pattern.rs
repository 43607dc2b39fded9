//! Compiled route path templates.
//!
//! | Template             | Example match              | Captured params                 |
//! |----------------------|----------------------------|---------------------------------|
//! | `/users`             | `/users`                   | *(none)*                        |
//! | `/users/{id}`        | `/users/42`                | `id → "42"`                     |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                     |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both templates and incoming paths, so `/users/` and
//! `/users` are treated as equivalent. The same matcher is used by the host [`Router`]
//! and by the cache route index, so both agree on which route a path belongs to.
//!
//! [`Router`]: super::Router

use crate::context::PathParams;

/// Name under which a wildcard template stores the unmatched path suffix.
pub const WILDCARD_PARAM: &str = "wildcard";

// A single path segment, either a literal string or a named capture.
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

#[derive(Debug, Clone)]
enum Kind {
    // Matches one exact path string, e.g. `/users`.
    Exact(String),
    // Matches a fixed number of segments where some may be named captures.
    Parameterized { segments: Vec<Segment> },
    // Matches any path that starts with the given prefix, e.g. `/files/*`.
    Wildcard(String),
}

/// A path template compiled for matching.
///
/// # Examples
///
/// ```
/// use rttp_cache::router::PathMatcher;
///
/// let matcher = PathMatcher::parse("/users/{id}/posts/:post_id");
/// let params = matcher.matches("/users/7/posts/99").unwrap();
/// assert_eq!(params.get("id"), Some("7"));
/// assert_eq!(params.get("post_id"), Some("99"));
/// assert!(matcher.matches("/users/7").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct PathMatcher {
    template: String,
    kind: Kind,
}

impl PathMatcher {
    /// Parse a route template into a matcher.
    ///
    /// The template is classified as follows (checked in order):
    ///
    /// 1. Ends with `/*` → wildcard, matches any path sharing the prefix.
    /// 2. Contains a `{name}` or `:name` segment → parameterized.
    /// 3. Otherwise → literal path match.
    pub fn parse(template: &str) -> Self {
        let normalized = trim_trailing_slash(template);

        let kind = if let Some(prefix) = normalized.strip_suffix("/*") {
            Kind::Wildcard(prefix.to_string())
        } else {
            let segments: Vec<Segment> = normalized
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match parameter_name(s) {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();

            if segments.iter().any(|s| matches!(s, Segment::Parameter(_))) {
                Kind::Parameterized { segments }
            } else {
                Kind::Exact(normalized.to_string())
            }
        };

        Self {
            template: template.to_string(),
            kind,
        }
    }

    /// Returns the template this matcher was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns the names of the parameters this template captures.
    pub fn param_names(&self) -> Vec<&str> {
        match &self.kind {
            Kind::Exact(_) => Vec::new(),
            Kind::Parameterized { segments } => segments
                .iter()
                .filter_map(|s| match s {
                    Segment::Parameter(name) => Some(name.as_str()),
                    Segment::Static(_) => None,
                })
                .collect(),
            Kind::Wildcard(_) => vec![WILDCARD_PARAM],
        }
    }

    /// Returns `true` when the template declares a parameter called `name`.
    pub fn declares(&self, name: &str) -> bool {
        self.param_names().contains(&name)
    }

    /// Try to match `path`, returning the captured parameters on success.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match &self.kind {
            Kind::Exact(p) => (p == path).then(PathParams::new),
            Kind::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }
                Some(params)
            }
            Kind::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                // `/files/*` must not match `/filesystem`.
                if !suffix.is_empty() && !suffix.starts_with('/') {
                    return None;
                }
                let mut params = PathParams::new();
                params.insert(WILDCARD_PARAM.to_string(), suffix.to_string());
                Some(params)
            }
        }
    }
}

/// `/users/` and `/users` route the same; `/` stays as is.
pub(crate) fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

// `{id}` and `:id` both declare a parameter named `id`.
fn parameter_name(segment: &str) -> Option<&str> {
    if let Some(name) = segment.strip_prefix(':') {
        return (!name.is_empty()).then_some(name);
    }
    segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_root() {
        let m = PathMatcher::parse("/");
        assert!(matches!(&m.kind, Kind::Exact(s) if s == "/"));
        assert!(m.matches("/").is_some());
        assert!(m.matches("/other").is_none());
    }

    #[test]
    fn parse_exact_nested() {
        let m = PathMatcher::parse("/users/profile");
        assert!(matches!(&m.kind, Kind::Exact(s) if s == "/users/profile"));
        assert!(m.param_names().is_empty());
    }

    #[test]
    fn trailing_slash_stripped() {
        let m = PathMatcher::parse("/users/");
        assert!(matches!(&m.kind, Kind::Exact(s) if s == "/users"));
        assert!(m.matches("/users").is_some());
        assert!(PathMatcher::parse("/users").matches("/users/").is_some());
        assert_eq!(m.template(), "/users/");
    }

    #[test]
    fn brace_and_colon_syntax_are_equivalent() {
        for template in ["/users/{id}", "/users/:id"] {
            let m = PathMatcher::parse(template);
            assert_eq!(m.param_names(), vec!["id"]);
            assert!(m.declares("id"));
            assert!(!m.declares("name"));
            assert_eq!(m.matches("/users/42").unwrap().get("id"), Some("42"));
        }
    }

    #[test]
    fn parameterized_multi() {
        let m = PathMatcher::parse("/users/{id}/posts/{post_id}");
        assert_eq!(m.param_names(), vec!["id", "post_id"]);
        let params = m.matches("/users/7/posts/99").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("post_id"), Some("99"));
    }

    #[test]
    fn parameterized_wrong_segment_count() {
        let m = PathMatcher::parse("/users/{id}");
        assert!(m.matches("/users").is_none());
        assert!(m.matches("/users/42/extra").is_none());
    }

    #[test]
    fn parameterized_wrong_static_segment() {
        let m = PathMatcher::parse("/users/{id}");
        assert!(m.matches("/posts/42").is_none());
    }

    #[test]
    fn empty_braces_are_literal() {
        let m = PathMatcher::parse("/odd/{}");
        assert!(m.param_names().is_empty());
        assert!(m.matches("/odd/{}").is_some());
    }

    #[test]
    fn wildcard_hit_and_miss() {
        let m = PathMatcher::parse("/files/*");
        assert_eq!(m.param_names(), vec![WILDCARD_PARAM]);
        let params = m.matches("/files/docs/readme.txt").unwrap();
        assert_eq!(params.get(WILDCARD_PARAM), Some("/docs/readme.txt"));
        assert!(m.matches("/other/readme.txt").is_none());
        assert!(m.matches("/filesystem").is_none());
    }
}
