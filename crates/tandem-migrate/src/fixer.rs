//! Event-driven repair
//!
//! [`Fixer`] replays one row from the base store onto the target: present
//! in the base → upsert overwriting every column, absent → delete.
//! [`FixConsumer`] drains inconsistency events off the queue, picks the
//! fixer matching each event's direction, and acks or nacks by outcome.
//!
//! Repair re-reads the base at fix time rather than trusting the event's
//! kind, so stale events converge on current truth: a `TargetMissing` for a
//! row deleted since validation becomes a delete, not a resurrect.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tandem_queue::{Consumer, Delivery};
use tandem_store::record::RecordStore;

use crate::entity::Entity;
use crate::error::Result;
use crate::events::{Direction, InconsistencyEvent};

// Pause before re-polling after a rejected message, so a persistently
// failing row does not spin the consumer.
const NACK_BACKOFF: Duration = Duration::from_millis(100);

/// What a fix did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    /// The base row was copied over the target row
    Upserted,
    /// The row was gone from the base, so it was deleted from the target
    Deleted,
}

/// Replays base rows onto a target store
pub struct Fixer<R: Entity> {
    base: Arc<dyn RecordStore<R>>,
    target: Arc<dyn RecordStore<R>>,
}

impl<R: Entity> Fixer<R> {
    /// Repairs write from `base` into `target`
    pub fn new(base: Arc<dyn RecordStore<R>>, target: Arc<dyn RecordStore<R>>) -> Self {
        Self { base, target }
    }

    /// Converge the target's row `id` to the base's
    ///
    /// Idempotent: fixing twice, or fixing an already-converged row, ends in
    /// the same state.
    pub async fn fix(&self, id: i64) -> Result<FixOutcome> {
        match self.base.find(id).await? {
            Some(row) => {
                self.target.upsert(&row).await?;
                Ok(FixOutcome::Upserted)
            }
            None => {
                self.target.delete(id).await?;
                Ok(FixOutcome::Deleted)
            }
        }
    }
}

impl<R: Entity> std::fmt::Debug for Fixer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixer").finish()
    }
}

/// Drains inconsistency events and repairs the flagged rows
///
/// Holds one fixer per direction, so events validated before a direction
/// flip are still repaired against the stores they were validated against.
pub struct FixConsumer<R: Entity> {
    consumer: Arc<dyn Consumer>,
    src_is_base: Fixer<R>,
    dst_is_base: Fixer<R>,
    fix_timeout: Duration,
}

impl<R: Entity> FixConsumer<R> {
    /// Build a consumer over the two stores; each event's direction picks
    /// which one is treated as the base
    pub fn new(
        consumer: Arc<dyn Consumer>,
        src: Arc<dyn RecordStore<R>>,
        dst: Arc<dyn RecordStore<R>>,
        fix_timeout: Duration,
    ) -> Self {
        Self {
            src_is_base: Fixer::new(src.clone(), dst.clone()),
            dst_is_base: Fixer::new(dst, src),
            consumer,
            fix_timeout,
        }
    }

    /// Consume and repair until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!("fix consumer starting");
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.consumer.next() => match polled {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        error!(error = %e, "fix consumer poll failed; stopping");
                        break;
                    }
                },
            };

            let rejected = self.handle(delivery).await;
            if rejected {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(NACK_BACKOFF) => {}
                }
            }
        }
        info!("fix consumer stopped");
    }

    /// Spawn [`run`](Self::run) onto the runtime
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Returns true when the delivery was rejected for redelivery
    async fn handle(&self, delivery: Delivery) -> bool {
        let event = match InconsistencyEvent::from_bytes(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                // Poison message: ack it away so it cannot wedge the group
                error!(error = %e, offset = delivery.offset, "undecodable event; discarding");
                self.ack(&delivery).await;
                return false;
            }
        };

        let fixer = match event.direction {
            Direction::Src => &self.src_is_base,
            Direction::Dst => &self.dst_is_base,
        };

        match tokio::time::timeout(self.fix_timeout, fixer.fix(event.id)).await {
            Ok(Ok(outcome)) => {
                debug!(id = event.id, direction = ?event.direction, ?outcome, "row repaired");
                self.ack(&delivery).await;
                false
            }
            Ok(Err(e)) => {
                error!(error = %e, id = event.id, "fix failed; leaving event for redelivery");
                self.nack(&delivery).await;
                true
            }
            Err(_) => {
                error!(id = event.id, "fix timed out; leaving event for redelivery");
                self.nack(&delivery).await;
                true
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.consumer.ack(delivery).await {
            warn!(error = %e, offset = delivery.offset, "ack failed");
        }
    }

    async fn nack(&self, delivery: &Delivery) {
        if let Err(e) = self.consumer.nack(delivery).await {
            warn!(error = %e, offset = delivery.offset, "nack failed");
        }
    }
}
