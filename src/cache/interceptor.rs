//! Pipeline entry point for the cache engine.
//!
//! [`CacheInterceptor`] is a [`Middleware`]: it resolves each request against the route
//! index and hands matching requests to a [`CacheController`]. Requests whose route
//! carries no caching policy, or that match no route at all, go straight to `next`
//! without any cache header.
//!
//! The index is built exactly once. Call [`CacheInterceptor::initialize`] at startup to
//! surface configuration errors before serving traffic; otherwise the first request
//! builds it from the route source given to the builder.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::error;

use super::clock::{Clock, SystemClock};
use super::config::{CacheSettings, ConfigError};
use super::controller::{CacheController, Controller};
use super::index::{RouteIndex, RouteSource};
use super::storage::{Backends, MemoryStorage, Storage};
use crate::context::Context;
use crate::http::Response;
use crate::middleware::{Middleware, Next};

struct Shared {
    controller: Arc<dyn CacheController>,
    routes: Option<Arc<dyn RouteSource>>,
    index: OnceCell<Arc<RouteIndex>>,
}

/// Caching middleware. Cheap to clone; clones share one index and controller.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use rttp_cache::{Method, Request, Response, Router, StatusCode};
/// use rttp_cache::cache::{CacheInterceptor, CachePolicy, MemoryStorage};
/// use rttp_cache::middleware::{Pipeline, from_middleware};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut router = Router::new();
/// router
///     .get("/greeting", |_ctx| async { Response::new(StatusCode::Ok).body("hello") })
///     .policy(CachePolicy::new(Duration::from_secs(60)));
/// let router = Arc::new(router);
///
/// let interceptor = CacheInterceptor::builder(Arc::new(MemoryStorage::new(1_000).unwrap()))
///     .build()
///     .unwrap();
/// interceptor.initialize(router.as_ref()).await.unwrap();
///
/// let pipeline = Pipeline::new()
///     .layer(from_middleware(Arc::new(interceptor)))
///     .layer(router.into_endpoint());
///
/// let first = pipeline.handle(Request::new(Method::Get, "/greeting")).await;
/// let second = pipeline.handle(Request::new(Method::Get, "/greeting")).await;
/// assert_eq!(first.headers().get("x-cache"), Some("MISS"));
/// assert_eq!(second.headers().get("x-cache"), Some("HIT"));
/// # }
/// ```
#[derive(Clone)]
pub struct CacheInterceptor {
    shared: Arc<Shared>,
}

impl CacheInterceptor {
    /// Start configuring an interceptor whose default backend is `storage`.
    pub fn builder(storage: Arc<dyn Storage>) -> CacheInterceptorBuilder {
        CacheInterceptorBuilder {
            default_backend: Some(storage),
            ..Self::in_memory()
        }
    }

    /// Start configuring an interceptor whose default backend is a [`MemoryStorage`]
    /// sized from [`CacheSettings::memory`] when the builder is built.
    ///
    /// ```
    /// use rttp_cache::cache::{CacheInterceptor, CacheSettings};
    ///
    /// let settings = CacheSettings::from_json(r#"{"memory": {"max_entries": 5000}}"#).unwrap();
    /// let interceptor = CacheInterceptor::in_memory().settings(settings).build().unwrap();
    /// assert!(!interceptor.is_initialized());
    /// ```
    pub fn in_memory() -> CacheInterceptorBuilder {
        CacheInterceptorBuilder {
            default_backend: None,
            named_backends: Vec::new(),
            settings: CacheSettings::default(),
            clock: Arc::new(SystemClock),
            routes: None,
            controller: None,
        }
    }

    /// Build the route index from `routes` and validate it against the controller.
    ///
    /// Only the first successful call builds anything; later calls return the existing
    /// index. A failed build leaves the interceptor uninitialized.
    pub async fn initialize(&self, routes: &dyn RouteSource) -> Result<Arc<RouteIndex>, ConfigError> {
        self.shared
            .index
            .get_or_try_init(|| async { self.build_index(routes) })
            .await
            .cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.index.initialized()
    }

    pub fn index(&self) -> Option<&Arc<RouteIndex>> {
        self.shared.index.get()
    }

    fn build_index(&self, routes: &dyn RouteSource) -> Result<Arc<RouteIndex>, ConfigError> {
        let index = RouteIndex::build(routes)?;
        self.shared.controller.validate(&index)?;
        Ok(Arc::new(index))
    }

    async fn index_or_init(&self) -> Result<Arc<RouteIndex>, ConfigError> {
        if let Some(index) = self.shared.index.get() {
            return Ok(Arc::clone(index));
        }
        let routes = self
            .shared
            .routes
            .as_ref()
            .ok_or(ConfigError::NoRouteSource)?;
        self.initialize(routes.as_ref()).await
    }

    async fn intercept(&self, ctx: Context, next: Next) -> Response {
        let index = match self.index_or_init().await {
            Ok(index) => index,
            Err(e) => {
                error!(error = %e, "cache route index unavailable, caching disabled for request");
                return next.run(ctx).await;
            }
        };

        let resolved = index.resolve(ctx.request().method(), ctx.request().path());
        match resolved {
            Some(route) if !route.entry.is_passthrough() => {
                self.shared.controller.handle(route, ctx, next).await
            }
            _ => next.run(ctx).await,
        }
    }
}

impl Middleware for CacheInterceptor {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let this = self.clone();
        Box::pin(async move { this.intercept(ctx, next).await })
    }
}

/// Configures a [`CacheInterceptor`].
pub struct CacheInterceptorBuilder {
    default_backend: Option<Arc<dyn Storage>>,
    named_backends: Vec<(String, Arc<dyn Storage>)>,
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    routes: Option<Arc<dyn RouteSource>>,
    controller: Option<Arc<dyn CacheController>>,
}

impl CacheInterceptorBuilder {
    /// Register a named backend that policies can select with `with_backend`.
    #[must_use]
    pub fn backend(mut self, name: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        self.named_backends.push((name.into(), storage));
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Route source used to build the index lazily on the first request.
    #[must_use]
    pub fn routes(mut self, routes: Arc<dyn RouteSource>) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Use a custom controller instead of the built-in one. Backends, settings and
    /// clock given to this builder are then ignored.
    #[must_use]
    pub fn controller(mut self, controller: Arc<dyn CacheController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn build(self) -> Result<CacheInterceptor, ConfigError> {
        self.settings.validate()?;
        let controller = match self.controller {
            Some(controller) => controller,
            None => {
                let default = match self.default_backend {
                    Some(storage) => storage,
                    None => Arc::new(MemoryStorage::from_settings(
                        &self.settings.memory,
                        Arc::clone(&self.clock),
                    )?),
                };
                let backends = self
                    .named_backends
                    .into_iter()
                    .fold(Backends::new(default), |mut backends, (name, storage)| {
                        backends.insert(name, storage);
                        backends
                    });
                Arc::new(
                    Controller::new(backends)
                        .with_settings(self.settings)
                        .with_clock(self.clock),
                )
            }
        };

        Ok(CacheInterceptor {
            shared: Arc::new(Shared {
                controller,
                routes: self.routes,
                index: OnceCell::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::index::ResolvedRoute;
    use crate::cache::policy::{CachePolicy, InvalidationPolicy};
    use crate::cache::storage::MemoryStorage;
    use crate::middleware::{Pipeline, from_middleware};
    use crate::{Method, Request, Router, StatusCode};

    fn router() -> Arc<Router> {
        let mut router = Router::new();
        router.get("/plain", |_ctx| async { Response::new(StatusCode::Ok).body("plain") });
        router
            .get("/cached", |_ctx| async { Response::new(StatusCode::Ok).body("cached") })
            .policy(CachePolicy::new(Duration::from_secs(60)));
        Arc::new(router)
    }

    fn storage() -> Arc<MemoryStorage> {
        Arc::new(MemoryStorage::new(100).unwrap())
    }

    fn pipeline(interceptor: CacheInterceptor, router: Arc<Router>) -> Pipeline {
        Pipeline::new()
            .layer(from_middleware(Arc::new(interceptor)))
            .layer(router.into_endpoint())
    }

    #[tokio::test]
    async fn lazily_builds_index_from_route_source() {
        let router = router();
        let interceptor = CacheInterceptor::builder(storage())
            .routes(router.clone())
            .build()
            .unwrap();
        assert!(!interceptor.is_initialized());

        let pipeline = pipeline(interceptor.clone(), router);
        let response = pipeline.handle(Request::new(Method::Get, "/cached")).await;
        assert_eq!(response.headers().get("x-cache"), Some("MISS"));
        assert!(interceptor.is_initialized());
        assert_eq!(interceptor.index().map(|i| i.len()), Some(2));
    }

    #[tokio::test]
    async fn in_memory_backend_is_sized_from_settings() {
        let router = router();
        let settings = CacheSettings::from_json(
            r#"{"memory": {"max_entries": 2, "evict_batch": 1}}"#,
        )
        .unwrap();
        let interceptor = CacheInterceptor::in_memory()
            .settings(settings)
            .routes(router.clone())
            .build()
            .unwrap();
        let pipeline = pipeline(interceptor, router);
        let get = |n: u8| Request::new(Method::Get, &format!("/cached?n={n}"));

        for n in 1..=3 {
            let response = pipeline.handle(get(n)).await;
            assert_eq!(response.headers().get("x-cache"), Some("MISS"));
        }
        assert_eq!(pipeline.handle(get(3)).await.headers().get("x-cache"), Some("HIT"));
        // Two slots: storing the third entry pushed out the first.
        assert_eq!(pipeline.handle(get(1)).await.headers().get("x-cache"), Some("MISS"));
    }

    #[test]
    fn in_memory_rejects_zero_capacity() {
        let settings = CacheSettings {
            memory: crate::cache::MemorySettings {
                max_entries: 0,
                ..Default::default()
            },
            ..CacheSettings::default()
        };
        let result = CacheInterceptor::in_memory().settings(settings).build();
        assert!(matches!(result, Err(ConfigError::InvalidSetting { .. })));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let router = router();
        let interceptor = CacheInterceptor::builder(storage()).build().unwrap();
        let first = interceptor.initialize(router.as_ref()).await.unwrap();
        let second = interceptor.initialize(router.as_ref()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn concurrent_first_requests_build_one_index() {
        let router = router();
        let interceptor = CacheInterceptor::builder(storage())
            .routes(router.clone())
            .build()
            .unwrap();

        let a = interceptor.clone();
        let b = interceptor.clone();
        let (ia, ib) = tokio::join!(a.index_or_init(), b.index_or_init());
        assert!(Arc::ptr_eq(&ia.unwrap(), &ib.unwrap()));
    }

    #[tokio::test]
    async fn untouched_when_no_policy_or_no_route() {
        let router = router();
        let interceptor = CacheInterceptor::builder(storage())
            .routes(router.clone())
            .build()
            .unwrap();
        let pipeline = pipeline(interceptor, router);

        let plain = pipeline.handle(Request::new(Method::Get, "/plain")).await;
        assert_eq!(&plain.body_ref()[..], b"plain");
        assert!(plain.headers().get("x-cache").is_none());

        let missing = pipeline.handle(Request::new(Method::Get, "/nowhere")).await;
        assert_eq!(missing.status(), StatusCode::NotFound);
        assert!(missing.headers().get("x-cache").is_none());
    }

    #[tokio::test]
    async fn bad_configuration_fails_initialize() {
        let mut router = Router::new();
        router
            .post("/data/{id}", |_ctx| async { Response::new(StatusCode::Ok) })
            .policy(InvalidationPolicy::new().with_key_template("data_{name}"));
        let interceptor = CacheInterceptor::builder(storage()).build().unwrap();

        let err = interceptor.initialize(&router).await.unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlaceholder { .. }));
        assert!(!interceptor.is_initialized());
    }

    #[tokio::test]
    async fn unknown_backend_fails_initialize() {
        let mut router = Router::new();
        router
            .get("/me", |_ctx| async { Response::new(StatusCode::Ok) })
            .policy(CachePolicy::new(Duration::from_secs(1)).with_backend("sessions"));

        let without = CacheInterceptor::builder(storage()).build().unwrap();
        assert!(matches!(
            without.initialize(&router).await,
            Err(ConfigError::UnknownBackend { .. })
        ));

        let with = CacheInterceptor::builder(storage())
            .backend("sessions", storage())
            .build()
            .unwrap();
        assert!(with.initialize(&router).await.is_ok());
    }

    #[tokio::test]
    async fn failed_lazy_build_passes_requests_through() {
        let mut router = Router::new();
        router
            .get("/data/{id}", |_ctx| async { Response::new(StatusCode::Ok).body("ok") })
            .policy(InvalidationPolicy::new().with_prefix("/{missing}"));
        let router = Arc::new(router);
        let interceptor = CacheInterceptor::builder(storage())
            .routes(router.clone())
            .build()
            .unwrap();

        let response = pipeline(interceptor, router)
            .handle(Request::new(Method::Get, "/data/1"))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(response.headers().get("x-cache").is_none());
    }

    #[tokio::test]
    async fn without_route_source_requests_pass_through() {
        let router = router();
        let interceptor = CacheInterceptor::builder(storage()).build().unwrap();
        let response = pipeline(interceptor, router)
            .handle(Request::new(Method::Get, "/cached"))
            .await;
        assert_eq!(&response.body_ref()[..], b"cached");
        assert!(response.headers().get("x-cache").is_none());
    }

    #[test]
    fn invalid_settings_fail_build() {
        let settings = CacheSettings {
            max_body_bytes: 0,
            ..CacheSettings::default()
        };
        assert!(
            CacheInterceptor::builder(storage())
                .settings(settings)
                .build()
                .is_err()
        );
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl CacheController for Counting {
        async fn handle(&self, _route: ResolvedRoute, ctx: Context, next: Next) -> Response {
            self.0.fetch_add(1, Ordering::SeqCst);
            let mut response = next.run(ctx).await;
            response.set_header("X-Custom-Controller", "yes");
            response
        }
    }

    #[tokio::test]
    async fn custom_controller_receives_policy_routes_only() {
        let router = router();
        let controller = Arc::new(Counting(AtomicUsize::new(0)));
        let interceptor = CacheInterceptor::builder(storage())
            .routes(router.clone())
            .controller(controller.clone())
            .build()
            .unwrap();
        let pipeline = pipeline(interceptor, router);

        let cached = pipeline.handle(Request::new(Method::Get, "/cached")).await;
        assert_eq!(cached.headers().get("x-custom-controller"), Some("yes"));
        pipeline.handle(Request::new(Method::Get, "/plain")).await;
        assert_eq!(controller.0.load(Ordering::SeqCst), 1);
    }
}
