//! Responses: built by handlers, replayed from cache records, decorated by middleware.

use bytes::Bytes;

use super::{Headers, StatusCode};

/// An HTTP response travelling back up the middleware pipeline.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert_eq!(response.headers().get("content-type"), Some("application/json"));
/// assert_eq!(&response.body_ref()[..], br#"{"status":"ok"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Empty body, no headers.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Builder form of [`Headers::insert`].
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// In-place [`Headers::insert`].
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// In-place [`Headers::set`], for stamping a response that came back from downstream.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// Keeps status and headers. `HEAD` answers go through here.
    pub fn clear_body(&mut self) {
        self.body = Bytes::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        assert_eq!(r.status(), StatusCode::Ok);
        assert_eq!(&r.body_ref()[..], b"Hello");
    }

    #[test]
    fn custom_header() {
        let r = Response::new(StatusCode::Ok)
            .header("X-Request-Id", "abc-123")
            .body("ok");
        assert_eq!(r.headers().get("x-request-id"), Some("abc-123"));
    }

    #[test]
    fn set_header_replaces() {
        let mut r = Response::new(StatusCode::Ok).header("X-Cache", "MISS");
        r.set_header("X-Cache", "HIT");
        assert_eq!(r.headers().get_all("x-cache").collect::<Vec<_>>(), vec!["HIT"]);
    }

    #[test]
    fn clear_body_keeps_headers() {
        let mut r = Response::new(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body("text");
        r.clear_body();
        assert!(r.body_ref().is_empty());
        assert_eq!(r.headers().get("content-type"), Some("text/plain"));
    }

    #[test]
    fn not_found() {
        let r = Response::new(StatusCode::NotFound).body("Not Found");
        assert_eq!(r.status().as_u16(), 404);
    }
}
