//! # rttp-cache
//!
//! Per-route response caching and invalidation for the rttp middleware pipeline.
//!
//! Routes declare what they cache and what they invalidate; a single middleware layer
//! enforces it. Handlers never touch the cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rttp_cache::cache::{CacheInterceptor, CachePolicy, InvalidationPolicy, MemoryStorage, TemplateKey};
//! use rttp_cache::context::Context;
//! use rttp_cache::middleware::{Pipeline, from_middleware};
//! use rttp_cache::{Method, Request, Response, Router, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router
//!         .get("/data/{id}", |ctx: Context| async move {
//!             let id = ctx.params().get("id").unwrap_or_default().to_owned();
//!             Response::new(StatusCode::Ok).body(format!(r#"{{"id":"{id}"}}"#))
//!         })
//!         .policy(CachePolicy::new(Duration::from_secs(300)).with_key(TemplateKey::new("data_{id}")));
//!     router
//!         .post("/data/{id}", |_ctx| async { Response::new(StatusCode::NoContent) })
//!         .policy(InvalidationPolicy::new().with_key_template("data_{id}"));
//!     let router = Arc::new(router);
//!
//!     let interceptor = CacheInterceptor::builder(Arc::new(MemoryStorage::new(10_000)?)).build()?;
//!     interceptor.initialize(router.as_ref()).await?;
//!
//!     let pipeline = Pipeline::new()
//!         .layer(from_middleware(Arc::new(interceptor)))
//!         .layer(router.into_endpoint());
//!
//!     let response = pipeline.handle(Request::new(Method::Get, "/data/42")).await;
//!     println!("{:?}", response.headers().get("x-cache"));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
