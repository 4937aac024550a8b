//! Cache implementations.
//!
//! The L1 level is always the in-memory LRU store. The shared L2 level and
//! the invalidation transport are selected at compile time.
//!
//! # Feature Flags
//!
//! - `memory` (default): in-process L2 store and tokio broadcast transport,
//!   for single-instance deployments and tests
//! - `redis`: Redis L2 store and Redis pub/sub transport
//!
//! These features are mutually exclusive.

#[cfg(all(feature = "memory", feature = "redis"))]
compile_error!(
    "Features 'memory' and 'redis' are mutually exclusive. \
    Enable only one shared backend at a time."
);

#[cfg(not(any(feature = "memory", feature = "redis")))]
compile_error!(
    "No shared backend selected. Enable 'memory' or 'redis' feature. \
    Example: cargo build -p tiercache --no-default-features --features redis"
);

mod breaker;
mod flight;
mod invalidation;
pub mod memory;
mod multilevel;
mod noop;
mod registry;
mod single;

#[cfg(feature = "redis")]
pub mod redis_impl;

pub use breaker::{BreakerStore, BreakerStoreProvider, CircuitBreaker, DEFAULT_BREAKER_NAME};
pub use flight::{Flight, RefreshCoordinator, SharedLoad};
pub use invalidation::{ChannelPublisher, InvalidationSubscriber};
pub use multilevel::{L2FailurePolicy, MultiLevelCache};
pub use noop::NoOpCache;
pub use registry::CacheRegistry;
pub use single::SingleLevelCache;

pub use memory::{MemoryPubSub, MemoryStore, MemoryStoreRegistry};

#[cfg(feature = "redis")]
pub use redis_impl::{RedisPubSub, RedisStore, RedisStoreProvider};
