//! Invalidation publisher over a [`PubSubTransport`].

use std::sync::Arc;

use tokio::runtime::Handle;

use tiercache_core::cache::{
    InvalidationMessage, InvalidationPublisher, PubSubTransport, Result,
};

use crate::metrics::record_publish_failure;

/// Publishes invalidation messages on one channel.
///
/// [`InvalidationPublisher::publish`] is fire-and-forget: the send runs on a
/// spawned task and failures are logged and counted, never returned.
#[derive(Clone)]
pub struct ChannelPublisher {
    transport: Arc<dyn PubSubTransport>,
    channel: String,
}

impl ChannelPublisher {
    pub fn new(transport: Arc<dyn PubSubTransport>, channel: impl Into<String>) -> Self {
        Self {
            transport,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publishes `message` and waits for the transport to accept it.
    ///
    /// Messages that do not survive the wire format are still sent, with a
    /// warning: peers will act on a different key.
    pub async fn send(&self, message: &InvalidationMessage) -> Result<()> {
        let payload = message.to_string();
        if !message.is_wire_safe() {
            tracing::warn!(
                channel = %self.channel,
                %payload,
                "Invalidation message has an empty or whitespace-containing name or key, peers will misapply it"
            );
        }
        self.transport.publish(&self.channel, &payload).await?;
        tracing::debug!(channel = %self.channel, %payload, "Published invalidation message");
        Ok(())
    }
}

impl InvalidationPublisher for ChannelPublisher {
    fn publish(&self, message: InvalidationMessage) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(%message, "No runtime available, dropping invalidation message");
            record_publish_failure(message.operation());
            return;
        };

        let publisher = self.clone();
        handle.spawn(async move {
            if let Err(err) = publisher.send(&message).await {
                tracing::warn!(
                    channel = %publisher.channel,
                    %message,
                    error = %err,
                    "Failed to publish invalidation message"
                );
                record_publish_failure(message.operation());
            }
        });
    }
}
