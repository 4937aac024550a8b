mod breaker;
mod entry;
mod error;
mod keys;
mod message;
mod traits;

pub use breaker::{Admission, BreakerMachine, BreakerSettings, CircuitState, Transition};
pub use entry::{soft_ttl, CacheEntry, MIN_SOFT_TTL};
pub use error::{CacheError, Result};
pub use keys::{shared_key, tracking_key, DEFAULT_INVALIDATION_CHANNEL, KEY_SEPARATOR};
pub use message::InvalidationMessage;
pub use traits::{
    loader, BoxError, Cache, CacheExt, InvalidationPublisher, Loader, PubSubTransport, Store,
    StoreProvider,
};
