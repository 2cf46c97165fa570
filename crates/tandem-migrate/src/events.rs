//! Inconsistency events
//!
//! The validator publishes one event per divergent row; the fix consumer
//! replays the base row onto the target. Payloads are JSON with stable
//! snake_case tags so other tooling can tap the stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use tandem_queue::Producer;

use crate::error::{MigrateError, Result};

/// Which store was the base (source of truth) when the event was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Source is the base; repairs write to the destination
    Src,
    /// Destination is the base; repairs write to the source
    Dst,
}

/// What kind of divergence was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// Row exists in the base but not the target
    TargetMissing,
    /// Row exists in the target but not the base
    BaseMissing,
    /// Row exists on both sides with different values
    NotEqual,
}

/// A single divergent row, as published by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InconsistencyEvent {
    /// Primary key of the divergent row
    pub id: i64,
    /// Base store at the time of validation
    pub direction: Direction,
    /// Divergence kind
    #[serde(rename = "type")]
    pub kind: InconsistencyKind,
}

impl InconsistencyEvent {
    /// Create an event
    pub fn new(id: i64, direction: Direction, kind: InconsistencyKind) -> Self {
        Self {
            id,
            direction,
            kind,
        }
    }

    /// Encode to the JSON wire form
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| MigrateError::codec(format!("encoding inconsistency event: {}", e)))
    }

    /// Decode from the JSON wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| MigrateError::codec(format!("decoding inconsistency event: {}", e)))
    }
}

/// Publishes inconsistency events for later repair
#[async_trait]
pub trait EventProducer: Send + Sync {
    /// Publish one event
    async fn publish(&self, event: &InconsistencyEvent) -> Result<()>;
}

/// [`EventProducer`] over a queue topic
pub struct QueueEventProducer {
    producer: Arc<dyn Producer>,
    topic: String,
    publish_timeout: Duration,
}

impl QueueEventProducer {
    /// Publish to `topic` on `producer`, bounding each publish by
    /// `publish_timeout`
    pub fn new(
        producer: Arc<dyn Producer>,
        topic: impl Into<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            publish_timeout,
        }
    }

    /// The topic events are published to
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl EventProducer for QueueEventProducer {
    async fn publish(&self, event: &InconsistencyEvent) -> Result<()> {
        let payload = event.to_bytes()?;
        match tokio::time::timeout(self.publish_timeout, self.producer.send(&self.topic, payload))
            .await
        {
            Ok(sent) => {
                sent?;
                Ok(())
            }
            Err(_) => Err(MigrateError::timeout(format!(
                "publishing inconsistency for id {} to {}",
                event.id, self.topic
            ))),
        }
    }
}
