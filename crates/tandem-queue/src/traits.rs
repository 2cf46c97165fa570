//! Producer and consumer traits
//!
//! Delivery is at-least-once: a message stays eligible for redelivery until
//! its offset is acknowledged. Consumers belong to a group; the group's
//! committed offset decides where a new subscriber resumes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// A message handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the message was published to
    pub topic: String,
    /// Position of the message in the topic log
    pub offset: u64,
    /// Message body
    pub payload: Bytes,
}

/// Publishes messages to topics
#[async_trait]
pub trait Producer: Send + Sync {
    /// Append a message to `topic`; returns its offset in the topic log
    async fn send(&self, topic: &str, payload: Bytes) -> Result<u64>;
}

/// Consumes messages from a single topic on behalf of a group
///
/// One active consumer per group per topic; concurrent consumers in the same
/// group would see the same messages twice.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Wait for the next message
    async fn next(&self) -> Result<Delivery>;

    /// Collect up to `max` messages, waiting at most `max_wait` for the
    /// first; whatever is already buffered after that is drained without
    /// further waiting
    async fn next_batch(&self, max: usize, max_wait: Duration) -> Result<Vec<Delivery>>;

    /// Acknowledge a delivery, committing its offset for the group
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Reject a delivery so it is delivered again
    async fn nack(&self, delivery: &Delivery) -> Result<()>;
}
