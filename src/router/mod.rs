//! Request routing: map path templates and HTTP methods to handler functions.
//!
//! This module provides [`Router`], which dispatches requests to handler functions based
//! on the request method and path. Templates are compiled by [`PathMatcher`]; see the
//! [`pattern`] module for the supported syntax.
//!
//! Every route can carry any number of opaque policy objects attached at registration
//! time. The router never interprets them; it only exposes them through [`RouteSource`]
//! so the cache index can classify them once at startup.
//!
//! Routes are matched in registration order; the first route whose method and template
//! both match the incoming request wins.

use std::pin::Pin;
use std::sync::Arc;

pub mod pattern;

pub use pattern::PathMatcher;

use crate::cache::{RouteDescriptor, RoutePolicy, RouteSource};
use crate::context::Context;
use crate::middleware::{MiddlewareHandler, Next};
use crate::{Method, Request, Response, StatusCode};

/// A stored route handler. Built by the registration helpers, never by hand.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Anything the router can register: in practice an async closure taking a [`Context`].
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

// One registration: method, compiled template, handler and attached policies.
struct Route {
    method: Method,
    matcher: PathMatcher,
    handler: Handler,
    policies: Vec<Arc<dyn RoutePolicy>>,
}

/// Handle returned by the registration helpers for attaching policy objects.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use rttp_cache::{Router, Response, StatusCode};
/// use rttp_cache::cache::CachePolicy;
///
/// let mut router = Router::new();
/// router
///     .get("/products/{id}", |_ctx| async { Response::new(StatusCode::Ok) })
///     .policy(CachePolicy::new(Duration::from_secs(60)));
/// ```
pub struct RouteBuilder<'r> {
    route: &'r mut Route,
}

impl RouteBuilder<'_> {
    /// Attach a policy object to the route. Order of attachment is preserved.
    pub fn policy(self, policy: impl RoutePolicy + 'static) -> Self {
        self.route.policies.push(Arc::new(policy));
        self
    }

    /// Attach an already shared policy object.
    pub fn shared_policy(self, policy: Arc<dyn RoutePolicy>) -> Self {
        self.route.policies.push(policy);
        self
    }
}

/// Ordered route table. Unmatched requests get `404 Not Found`.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_cache::{Router, Response, StatusCode};
/// use rttp_cache::context::Context;
///
/// let mut router = Router::new();
///
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) });
///
/// router.get("/users/{id}", |ctx: Context| async move {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
pub struct Router {
    routes: Vec<Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Get, path, handler)
    }

    pub fn head(&mut self, path: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Head, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Post, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Put, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Delete, path, handler)
    }

    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        self.add_route(Method::Patch, path, handler)
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) -> RouteBuilder<'_> {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            matcher: PathMatcher::parse(path),
            handler,
            policies: Vec::new(),
        });
        let last = self.routes.len() - 1;
        RouteBuilder {
            route: &mut self.routes[last],
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First match in registration order wins.
    pub async fn route(&self, request: Request) -> Response {
        self.dispatch(Context::new(request)).await
    }

    /// Dispatch a request already wrapped in a [`Context`].
    ///
    /// Path parameters captured by the matching template replace whatever the context
    /// carried before.
    pub async fn dispatch(&self, ctx: Context) -> Response {
        let request = ctx.into_request();

        for route in &self.routes {
            if &route.method != request.method() {
                continue;
            }
            if let Some(params) = route.matcher.matches(request.path()) {
                let ctx = Context::with_params(request, params);
                return (route.handler)(ctx).await;
            }
        }

        Response::new(StatusCode::NotFound)
    }

    /// Mount the router as the terminal handler of a middleware pipeline.
    ///
    /// The returned handler never calls `next`; it always answers from a route (or 404).
    pub fn into_endpoint(self: Arc<Self>) -> MiddlewareHandler {
        Arc::new(move |ctx: Context, _next: Next| {
            let router = Arc::clone(&self);
            let fut: Pin<Box<dyn Future<Output = Response> + Send>> =
                Box::pin(async move { router.dispatch(ctx).await });
            fut
        })
    }
}

impl RouteSource for Router {
    fn routes(&self) -> Vec<RouteDescriptor<'_>> {
        self.routes
            .iter()
            .map(|route| RouteDescriptor {
                method: route.method.clone(),
                path_template: route.matcher.template(),
                policies: &route.policies,
            })
            .collect()
    }
}
