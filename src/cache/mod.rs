//! Declarative response caching and invalidation.
//!
//! Policies are attached to routes when they are registered; the engine does the rest:
//!
//! - [`CachePolicy`] on a GET/HEAD route caches its responses for `max_age`.
//! - [`InvalidationPolicy`] on a write route drops cached entries before the handler
//!   runs.
//!
//! ## Pieces
//!
//! - [`RouteIndex`]: built once from a [`RouteSource`], maps requests to policies.
//! - [`Controller`]: the per-request decision engine, behind [`CacheController`].
//! - [`Storage`]: async backend trait; [`MemoryStorage`] is the bundled one, and
//!   `RedisStorage` (feature `redis`) is shared across processes.
//! - [`KeyGenerator`] and [`KeyFunction`]: cache key derivation.
//! - [`Serializer`] and [`CacheRecord`]: the stored form of a response.
//! - [`CacheInterceptor`]: the [`Middleware`](crate::middleware::Middleware) tying it
//!   together.
//!
//! Every response the engine handles carries an outcome header (`X-Cache` by default)
//! with `HIT`, `MISS`, `EXPIRED` or `BYPASS`.

pub mod clock;
pub mod config;
pub mod control;
pub mod controller;
pub mod index;
pub mod interceptor;
pub mod key;
pub mod policy;
pub mod record;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheSettings, ConfigError, MemorySettings};
pub use control::CacheControl;
pub use controller::{CacheController, CacheOutcome, Controller};
pub use index::{ResolvedRoute, RouteDescriptor, RouteEntry, RouteIndex, RouteSource};
pub use interceptor::{CacheInterceptor, CacheInterceptorBuilder};
pub use key::{
    DefaultKey, InvalidationTarget, KeyError, KeyFunction, KeyGenerator, KeyTemplate, PrincipalKey,
    TemplateKey,
};
pub use policy::{CachePolicy, InvalidationPolicy, PathMatch, PolicyKind, RoutePolicy, Visibility};
pub use record::{CacheRecord, SerializationError, Serializer};
pub use storage::{Backends, KeyPattern, MemoryStorage, Storage, StorageError, StorageResult};
#[cfg(feature = "redis")]
pub use storage::RedisStorage;
