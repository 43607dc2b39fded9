//! `Cache-Control` directive parsing.
//!
//! Only the directives the engine acts on are recognised; everything else is ignored.
//! Directive names are case-insensitive and may be spread over several header lines.

use crate::http::Headers;

pub const CACHE_CONTROL: &str = "cache-control";

/// The subset of `Cache-Control` directives relevant to caching decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
}

impl CacheControl {
    /// Collects directives from every `Cache-Control` value in `headers`.
    ///
    /// # Examples
    ///
    /// ```
    /// use rttp_cache::cache::CacheControl;
    /// use rttp_cache::http::Headers;
    ///
    /// let mut headers = Headers::new();
    /// headers.insert("Cache-Control", "max-age=0, No-Cache");
    /// let cc = CacheControl::from_headers(&headers);
    /// assert!(cc.no_cache);
    /// assert!(!cc.no_store);
    /// ```
    pub fn from_headers(headers: &Headers) -> Self {
        let mut cc = Self::default();
        for value in headers.get_all(CACHE_CONTROL) {
            for directive in value.split(',') {
                // `private="set-cookie"` still means private.
                let name = directive.split('=').next().unwrap_or("").trim();
                if name.eq_ignore_ascii_case("no-store") {
                    cc.no_store = true;
                } else if name.eq_ignore_ascii_case("no-cache") {
                    cc.no_cache = true;
                } else if name.eq_ignore_ascii_case("private") {
                    cc.private = true;
                }
            }
        }
        cc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(values: &[&str]) -> CacheControl {
        let mut headers = Headers::new();
        for v in values {
            headers.insert("Cache-Control", *v);
        }
        CacheControl::from_headers(&headers)
    }

    #[test]
    fn absent_header_is_default() {
        assert_eq!(parse(&[]), CacheControl::default());
    }

    #[test]
    fn directives_across_lines() {
        let cc = parse(&["public, max-age=60", "NO-STORE"]);
        assert!(cc.no_store);
        assert!(!cc.no_cache);
        assert!(!cc.private);
    }

    #[test]
    fn private_with_field_list() {
        let cc = parse(&[r#"private="set-cookie", no-cache"#]);
        assert!(cc.private);
        assert!(cc.no_cache);
    }

    #[test]
    fn substrings_do_not_match() {
        let cc = parse(&["x-no-store-hint"]);
        assert!(!cc.no_store);
    }
}
