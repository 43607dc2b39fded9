//! Per-request context carried through the middleware pipeline.
//!
//! A [`Context`] owns the [`Request`] while it travels from middleware to middleware and
//! finally to a route handler. Path parameters captured by route matching live on the
//! request itself so that anything holding a `&Request` (key functions in particular)
//! can read them.

use std::collections::HashMap;

use crate::Request;

/// Values captured by `{name}` segments of the matched template.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|value| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over `(name, value)` pairs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Per-request context handed to every middleware and handler.
pub struct Context {
    request: Request,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    /// Attach route-captured parameters to `request` before wrapping it.
    pub fn with_params(mut request: Request, params: PathParams) -> Self {
        request.set_path_params(params);
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn params(&self) -> &PathParams {
        self.request.path_params()
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    /// Body parsed as JSON. Write handlers use this to reject malformed payloads.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}
