//! Redis backends.
//!
//! Provides the shared level for multi-instance deployments and the pub/sub
//! transport that carries invalidation messages between instances.

mod error;
mod pubsub;
mod store;

pub use error::map_redis_error;
pub use pubsub::RedisPubSub;
pub use store::{RedisStore, RedisStoreProvider};
