//! Two-level cache with stale-while-revalidate and cross-instance invalidation.
//!
//! Callers resolve a named cache from the [`CacheRegistry`] (usually through a
//! [`CacheStack`] built from [`Config`]) and use the [`Cache`] operations. The
//! backend of the shared level is chosen with the `memory` or `redis` feature.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod stack;

pub use cache::{CacheRegistry, L2FailurePolicy};
pub use config::Config;
pub use stack::CacheStack;
pub use tiercache_core::cache::{
    loader, BoxError, Cache, CacheError, CacheExt, InvalidationMessage, Loader, Result,
};
