use async_trait::async_trait;

use super::Result;
use super::models::{Delivery, Event, EventQuery, Subscription};

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event and fan it out to every subscribed consumer group.
    ///
    /// Implementations must provide at-least-once delivery. Publishing an event whose
    /// `(scope, dedupe_key)` already exists returns the stored event id.
    async fn publish(&self, event: Event) -> Result<String>; // event_id

    /// Register (or replace) a consumer group's topic patterns.
    async fn subscribe(&self, sub: Subscription) -> Result<()>;

    async fn unsubscribe(&self, group: &str) -> Result<()>;

    /// Lease up to `max` pending deliveries for `group`.
    async fn receive(&self, group: &str, max: usize) -> Result<Vec<Delivery>>;

    /// Checkpoint: the delivery is done and never handed out again.
    async fn ack(&self, group: &str, event_id: &str) -> Result<()>;

    /// Release the delivery for a later retry (or dead-letter it).
    async fn nack(&self, group: &str, event_id: &str, reason: &str) -> Result<()>;

    /// Query events (for replay, debugging, audit).
    async fn query(&self, filter: EventQuery) -> Result<Vec<Event>>;

    /// List current subscriptions.
    ///
    /// Default implementation returns an empty list.
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(Vec::new())
    }
}
