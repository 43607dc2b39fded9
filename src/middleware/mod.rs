//! Middleware pipeline: composable before/after request handler logic.
//!
//! This module defines the core types for building an ordered middleware stack.
//! Each middleware wraps the next layer, enabling request inspection, short-circuit
//! responses, and response decoration without coupling handlers to infrastructure
//! concerns. The cache interceptor is one such layer.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`]: converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`Pipeline`]: an ordered stack of handlers, terminal handler last.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Request, Response, context::Context};

/// The rest of the chain, handed to each middleware.
///
/// Consumed by [`run`](Self::run), so a layer can call downstream at most once. A
/// chain that runs out without a terminal handler answers `500`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use rttp_cache::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// One layer of the stack, type-erased and cheap to clone.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::cache::{CacheInterceptor, MemoryStorage};
/// use rttp_cache::middleware::from_middleware;
///
/// let interceptor = CacheInterceptor::builder(Arc::new(MemoryStorage::new(1_000).unwrap()))
///     .build()
///     .unwrap();
/// let handler = from_middleware(Arc::new(interceptor));
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Position a cursor at the start of `middlewares`.
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invoke the next layer, or answer `500` if none is left.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(crate::StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// A layer that can inspect the request, answer early, or decorate the response
/// produced further down.
///
/// The returned future must be `Send` and must not borrow `self`; implementations
/// clone whatever shared state they need into it.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack.
///
/// Layers run in the order they were added; the last layer is expected to be a
/// terminal handler (such as [`Router::into_endpoint`](crate::Router::into_endpoint))
/// that answers without calling `next`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::{Method, Request, Response, Router, StatusCode};
/// use rttp_cache::middleware::Pipeline;
///
/// # async fn example() {
/// let mut router = Router::new();
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) });
///
/// let pipeline = Pipeline::new().layer(Arc::new(router).into_endpoint());
/// let response = pipeline.handle(Request::new(Method::Get, "/ping")).await;
/// assert_eq!(response.status(), StatusCode::Ok);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    handlers: Vec<MiddlewareHandler>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer to the end of the stack.
    #[must_use]
    pub fn layer(mut self, handler: MiddlewareHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Runs `request` through every layer, starting from the first.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(self.handlers.clone())
            .run(Context::new(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, StatusCode};

    struct Stamp(&'static str);

    impl Middleware for Stamp {
        fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let tag = self.0;
            Box::pin(async move {
                let mut response = next.run(ctx).await;
                response.add_header("X-Stamp", tag);
                response
            })
        }
    }

    fn terminal(status: StatusCode) -> MiddlewareHandler {
        Arc::new(move |_ctx: Context, _next: Next| {
            let fut: Pin<Box<dyn Future<Output = Response> + Send>> =
                Box::pin(async move { Response::new(status) });
            fut
        })
    }

    #[tokio::test]
    async fn empty_pipeline_falls_back_to_500() {
        let response = Pipeline::new()
            .handle(Request::new(Method::Get, "/"))
            .await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn layers_run_outside_in() {
        let pipeline = Pipeline::new()
            .layer(from_middleware(Arc::new(Stamp("outer"))))
            .layer(from_middleware(Arc::new(Stamp("inner"))))
            .layer(terminal(StatusCode::Accepted));

        let response = pipeline.handle(Request::new(Method::Get, "/")).await;
        assert_eq!(response.status(), StatusCode::Accepted);
        // Inner decorates first on the way back up.
        let stamps: Vec<_> = response.headers().get_all("x-stamp").collect();
        assert_eq!(stamps, vec!["inner", "outer"]);
    }
}
