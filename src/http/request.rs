//! HTTP request as seen by middleware and handlers.
//!
//! The host framework owns transport and parsing; by the time a request reaches the
//! pipeline it is a plain value exposing method, path, query, headers, body and the
//! path parameters captured by route matching.

use bytes::Bytes;

use super::{Headers, Method};
use crate::context::PathParams;

/// A request flowing through the middleware pipeline.
///
/// Built with [`Request::new`] from a method and a request target (path plus optional
/// query string), then decorated with the builder methods.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::{Method, Request};
///
/// let request = Request::new(Method::Get, "/hello?name=world&page=2")
///     .header("Host", "localhost");
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    // Parsed from `query`, in the order they appeared.
    query_params: Vec<(String, String)>,
    path_params: PathParams,
}

impl Request {
    /// Creates a request for `target`, splitting off and parsing the query string.
    ///
    /// An empty query (`/path?`) is treated as no query at all.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) if !query.is_empty() => (path, Some(query.to_owned())),
            Some((path, _)) => (path, None),
            None => (target, None),
        };
        let query_params = query.as_deref().map(parse_query_string).unwrap_or_default();

        Self {
            method,
            path: path.to_owned(),
            headers: Headers::new(),
            query,
            body: Bytes::new(),
            query_params,
            path_params: PathParams::new(),
        }
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the first value of a query parameter by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns all query parameters in their original order, duplicates included.
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query_params
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the path parameters captured by route matching.
    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    /// Returns a single captured path parameter.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }

    /// Replaces the captured path parameters.
    pub fn set_path_params(&mut self, params: PathParams) {
        self.path_params = params;
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into ordered pairs.
///
/// Keys and values have `+` decoded as a space. Empty segments (`a=1&&b=2`) are skipped.
fn parse_query_string(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.replace('+', " "), value.replace('+', " "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_get() {
        let req = Request::new(Method::Get, "/").header("Host", "localhost");
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.path(), "/");
        assert_eq!(req.query_string(), None);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert!(req.body().is_empty());
    }

    #[test]
    fn query_string() {
        let req = Request::new(Method::Get, "/search?q=rust&page=2");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&page=2"));
        assert_eq!(req.query_param("q"), Some("rust"));
        assert_eq!(req.query_param("page"), Some("2"));
    }

    #[test]
    fn query_keeps_order_and_duplicates() {
        let req = Request::new(Method::Get, "/s?tag=b&tag=a&x+y=1+2&flag");
        assert_eq!(
            req.query_params(),
            &[
                ("tag".to_string(), "b".to_string()),
                ("tag".to_string(), "a".to_string()),
                ("x y".to_string(), "1 2".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn empty_query_is_none() {
        let req = Request::new(Method::Get, "/items?");
        assert_eq!(req.path(), "/items");
        assert_eq!(req.query_string(), None);
        assert!(req.query_params().is_empty());
    }

    #[test]
    fn path_params_are_replaceable() {
        let mut req = Request::new(Method::Post, "/data/42").body_bytes("payload");
        assert_eq!(req.path_param("id"), None);

        let mut params = PathParams::new();
        params.insert("id".to_string(), "42".to_string());
        req.set_path_params(params);

        assert_eq!(req.path_param("id"), Some("42"));
        assert_eq!(&req.body()[..], b"payload");
    }
}
