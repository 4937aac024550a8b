//! Functional core of tiercache.
//!
//! Everything in this crate is free of I/O: cache entries and staleness,
//! key namespacing, the invalidation message grammar, the circuit breaker
//! state machine, and the traits the engine is assembled from. Concrete
//! stores, transports and the composite cache live in the `tiercache` crate.

pub mod cache;
