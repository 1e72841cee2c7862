use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::engine::EnrichmentOrchestrator;
use crate::events::models::{Delivery, Event, Subscription};
use crate::events::traits::EventBus;
use crate::Result;

/// Processes one delivered event.
///
/// Returning an error whose `is_redeliverable()` is true leaves the delivery
/// unacknowledged; any other outcome is checkpointed.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<()>;
}

#[async_trait]
impl EventHandler for EnrichmentOrchestrator {
    async fn handle(&self, event: &Event) -> Result<()> {
        EnrichmentOrchestrator::handle(self, event).await.map(|_| ())
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group: String,
    pub topics: Vec<String>,
    pub batch_size: usize,
    /// Sleep between polls when the bus had nothing for us.
    pub poll_interval: Duration,
    /// Upper bound for one handler call; exceeding it nacks the delivery.
    pub handler_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "enrichment".to_string(),
            topics: crate::messages::topics::INBOUND
                .iter()
                .map(|t| t.to_string())
                .collect(),
            batch_size: 16,
            poll_interval: Duration::from_millis(500),
            handler_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub received: usize,
    pub acked: usize,
    pub nacked: usize,
}

/// Receive → handle → ack/nack loop for one consumer group.
pub struct ConsumerRunner {
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    cfg: ConsumerConfig,
}

impl ConsumerRunner {
    pub fn new(bus: Arc<dyn EventBus>, handler: Arc<dyn EventHandler>, cfg: ConsumerConfig) -> Self {
        Self { bus, handler, cfg }
    }

    /// Register the group's topic patterns with the bus.
    pub async fn subscribe(&self) -> Result<()> {
        let sub = Subscription::new(self.cfg.group.clone(), self.cfg.topics.clone())?;
        self.bus.subscribe(sub).await?;
        Ok(())
    }

    /// Settle up to `batch_size` deliveries, stopping early at the first nack.
    ///
    /// Each delivery is leased right before it is handled, so the lease only has
    /// to outlive one handler call and the rest of the batch stays visible to
    /// other workers in the group.
    pub async fn run_once(&self) -> Result<BatchStats> {
        let mut stats = BatchStats::default();
        for _ in 0..self.cfg.batch_size.max(1) {
            let Some(delivery) = self.bus.receive(&self.cfg.group, 1).await?.pop() else {
                break;
            };
            stats.received += 1;
            if self.settle(&delivery).await? {
                stats.acked += 1;
            } else {
                // Back off to the poll interval instead of re-leasing a delivery we just released.
                stats.nacked += 1;
                break;
            }
        }
        Ok(stats)
    }

    // Returns true when the delivery was acked.
    #[tracing::instrument(level = "debug", skip_all, fields(event_id = %delivery.event.id, attempts = delivery.attempts))]
    async fn settle(&self, delivery: &Delivery) -> Result<bool> {
        let group = &self.cfg.group;
        let event_id = delivery.event_id();
        let outcome =
            tokio::time::timeout(self.cfg.handler_timeout, self.handler.handle(&delivery.event))
                .await;

        match outcome {
            Ok(Ok(())) => {
                self.bus.ack(group, event_id).await?;
                Ok(true)
            }
            Ok(Err(e)) if e.is_redeliverable() => {
                tracing::warn!(error = %e, "handler failed; leaving delivery for redelivery");
                self.bus.nack(group, event_id, &e.to_string()).await?;
                Ok(false)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, topic = %delivery.event.topic, "dropping event");
                self.bus.ack(group, event_id).await?;
                Ok(true)
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.cfg.handler_timeout, "handler timed out");
                self.bus.nack(group, event_id, "handler timeout").await?;
                Ok(false)
            }
        }
    }

    /// Consume until `shutdown` flips to true. The delivery in flight is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.subscribe().await?;
        tracing::info!(group = %self.cfg.group, topics = ?self.cfg.topics, "consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(stats) => {
                    if stats.received > 0 {
                        tracing::debug!(?stats, "batch settled");
                    }
                    stats.received == 0 || stats.nacked > 0
                }
                Err(e) => {
                    tracing::error!(error = %e, "consumer batch failed");
                    true
                }
            };
            if !idle {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(group = %self.cfg.group, "consumer stopped");
        Ok(())
    }
}
