//! In-process message bus
//!
//! Append-only per-topic logs with consumer groups and a committed-offset
//! ledger. Messages are never removed; a group's committed offset is the
//! position of the first message it has not fully processed, so anything a
//! subscriber read but did not ack is redelivered when the group resumes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, trace};

use crate::error::Result;
use crate::traits::{Consumer, Delivery, Producer};

struct TopicLog {
    messages: RwLock<Vec<Bytes>>,
    notify: Notify,
}

impl TopicLog {
    fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            notify: Notify::new(),
        }
    }
}

struct BusInner {
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
    // (group, topic) -> offset of the first unprocessed message
    committed: RwLock<HashMap<(String, String), u64>>,
}

/// In-process bus implementing [`Producer`], with group subscriptions
///
/// Clones share the same logs and ledger, so one bus instance can be handed
/// to producers and consumers alike.
#[derive(Clone)]
pub struct InProcessBus {
    inner: Arc<BusInner>,
}

impl InProcessBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: RwLock::new(HashMap::new()),
                committed: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe `group` to `topic`, resuming from the group's committed
    /// offset
    ///
    /// Topics are created on first use, by publisher or subscriber.
    pub async fn subscribe(&self, topic: &str, group: &str) -> BusSubscriber {
        let log = self.topic(topic).await;
        let start = self.committed(group, topic).await;
        debug!(topic, group, start, "subscriber attached");
        BusSubscriber {
            bus: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            log,
            position: AtomicU64::new(start),
        }
    }

    /// Number of messages published to `topic` (0 if it does not exist)
    pub async fn len(&self, topic: &str) -> usize {
        match self.inner.topics.read().await.get(topic) {
            Some(log) => log.messages.read().await.len(),
            None => 0,
        }
    }

    /// Whether `topic` holds no messages
    pub async fn is_empty(&self, topic: &str) -> bool {
        self.len(topic).await == 0
    }

    /// Committed offset for `group` on `topic` (0 if never committed)
    pub async fn committed(&self, group: &str, topic: &str) -> u64 {
        self.inner
            .committed
            .read()
            .await
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }

    async fn topic(&self, name: &str) -> Arc<TopicLog> {
        {
            let topics = self.inner.topics.read().await;
            if let Some(log) = topics.get(name) {
                return log.clone();
            }
        }
        let mut topics = self.inner.topics.write().await;
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new()))
            .clone()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InProcessBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessBus").finish()
    }
}

#[async_trait]
impl Producer for InProcessBus {
    async fn send(&self, topic: &str, payload: Bytes) -> Result<u64> {
        let log = self.topic(topic).await;
        let offset = {
            let mut messages = log.messages.write().await;
            messages.push(payload);
            messages.len() as u64 - 1
        };
        log.notify.notify_waiters();
        trace!(topic, offset, "message published");
        Ok(offset)
    }
}

/// A group subscription to one topic
///
/// Tracks a session position separate from the group's committed offset.
/// `next` advances the position; `ack` moves the committed offset; `nack`
/// rewinds the position so the message comes around again.
pub struct BusSubscriber {
    bus: InProcessBus,
    topic: String,
    group: String,
    log: Arc<TopicLog>,
    position: AtomicU64,
}

impl BusSubscriber {
    /// The subscribed topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The consumer group
    pub fn group(&self) -> &str {
        &self.group
    }

    fn try_take(&self, messages: &[Bytes]) -> Option<Delivery> {
        let pos = self.position.load(Ordering::Acquire);
        let payload = messages.get(pos as usize)?.clone();
        self.position.store(pos + 1, Ordering::Release);
        Some(Delivery {
            topic: self.topic.clone(),
            offset: pos,
            payload,
        })
    }
}

impl std::fmt::Debug for BusSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscriber")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("position", &self.position.load(Ordering::Acquire))
            .finish()
    }
}

#[async_trait]
impl Consumer for BusSubscriber {
    async fn next(&self) -> Result<Delivery> {
        loop {
            // Register for notification before checking, so a publish that
            // lands between the check and the await still wakes us.
            let notified = self.log.notify.notified();
            {
                let messages = self.log.messages.read().await;
                if let Some(delivery) = self.try_take(&messages) {
                    return Ok(delivery);
                }
            }
            notified.await;
        }
    }

    async fn next_batch(&self, max: usize, max_wait: Duration) -> Result<Vec<Delivery>> {
        let mut batch = Vec::new();
        if max == 0 {
            return Ok(batch);
        }

        match tokio::time::timeout(max_wait, self.next()).await {
            Ok(first) => batch.push(first?),
            Err(_) => return Ok(batch),
        }

        let messages = self.log.messages.read().await;
        while batch.len() < max {
            match self.try_take(&messages) {
                Some(delivery) => batch.push(delivery),
                None => break,
            }
        }
        Ok(batch)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut committed = self.bus.inner.committed.write().await;
        let entry = committed
            .entry((self.group.clone(), delivery.topic.clone()))
            .or_insert(0);
        // Monotonic: acks arriving out of order never move the ledger back
        *entry = (*entry).max(delivery.offset + 1);
        trace!(
            topic = %delivery.topic,
            group = %self.group,
            committed = *entry,
            "offset committed"
        );
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        self.position.fetch_min(delivery.offset, Ordering::AcqRel);
        debug!(
            topic = %delivery.topic,
            group = %self.group,
            offset = delivery.offset,
            "message rejected; rewound for redelivery"
        );
        Ok(())
    }
}
