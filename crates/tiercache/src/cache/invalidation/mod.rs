//! Cross-instance invalidation.
//!
//! Evictions and clears are published as one line of text on a shared
//! channel. Every instance runs a subscriber that applies the message to its
//! own L1 stores; shared stores are already consistent.

mod publisher;
mod subscriber;

pub use publisher::ChannelPublisher;
pub use subscriber::InvalidationSubscriber;
