//! In-memory backends.
//!
//! The store and its registry back every L1 cache. With the `memory`
//! feature they also stand in for the shared level, and the broadcast
//! pub/sub carries invalidation messages within the process.

mod pubsub;
mod registry;
mod store;

pub use pubsub::MemoryPubSub;
pub use registry::MemoryStoreRegistry;
pub use store::MemoryStore;
