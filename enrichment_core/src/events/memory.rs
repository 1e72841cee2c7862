use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::config::EventBusConfig;
use super::models::{Delivery, DeliveryStatus, Event, EventQuery, Subscription, add_std};
use super::traits::EventBus;
use super::{Error, Result};

/// In-memory EventBus for local development and unit tests.
///
/// Semantics match the durable bus for the lifetime of the process: per-group
/// deliveries, leases, nack backoff and dead-lettering.
#[derive(Clone, Default)]
pub struct MemoryEventBus {
    cfg: EventBusConfig,
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    events: Vec<Event>,
    by_id: HashMap<String, usize>,
    by_dedupe: HashMap<(String, String), String>,
    subs: BTreeMap<String, Subscription>,
    deliveries: HashMap<String, Vec<DeliveryRow>>, // group -> rows in publish order
}

#[derive(Debug, Clone)]
struct DeliveryRow {
    event_id: String,
    status: DeliveryStatus,
    attempts: u32,
    available_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(cfg: EventBusConfig) -> Self {
        Self {
            cfg,
            state: Arc::default(),
        }
    }

    /// Return a snapshot of all events (primarily for tests).
    pub async fn all_events(&self) -> Vec<Event> {
        self.state.lock().await.events.clone()
    }

    /// Events published on `topic`, in publish order.
    pub async fn events_on(&self, topic: &str) -> Vec<Event> {
        self.state
            .lock()
            .await
            .events
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Dead-lettered event ids for a group, with the last nack reason.
    pub async fn dead_letters(&self, group: &str) -> Vec<(String, Option<String>)> {
        let state = self.state.lock().await;
        state
            .deliveries
            .get(group)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.status == DeliveryStatus::DeadLettered)
                    .map(|r| (r.event_id.clone(), r.last_error.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliveries not yet acked or dead-lettered.
    pub async fn outstanding(&self, group: &str) -> usize {
        let state = self.state.lock().await;
        state
            .deliveries
            .get(group)
            .map(|rows| {
                rows.iter()
                    .filter(|r| {
                        matches!(r.status, DeliveryStatus::Pending | DeliveryStatus::Leased)
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) -> Result<String> {
        if event.scope.trim().is_empty() {
            return Err(Error::InvalidScope);
        }
        if event.topic.trim().is_empty() {
            return Err(Error::InvalidTopic);
        }
        self.cfg.check_payload(&event.payload)?;

        let mut state = self.state.lock().await;
        let key = (event.scope.clone(), event.dedupe_key.clone());
        if let Some(existing) = state.by_dedupe.get(&key) {
            return Ok(existing.clone());
        }

        let groups: Vec<String> = state
            .subs
            .values()
            .filter(|s| s.matches(&event.topic))
            .map(|s| s.group.clone())
            .collect();
        for group in groups {
            state
                .deliveries
                .entry(group)
                .or_default()
                .push(DeliveryRow {
                    event_id: event.id.clone(),
                    status: DeliveryStatus::Pending,
                    attempts: 0,
                    available_at: event.received_at,
                    last_error: None,
                });
        }

        let id = event.id.clone();
        let idx = state.events.len();
        state.by_id.insert(id.clone(), idx);
        state.by_dedupe.insert(key, id.clone());
        state.events.push(event);
        Ok(id)
    }

    async fn subscribe(&self, sub: Subscription) -> Result<()> {
        let mut state = self.state.lock().await;
        state.deliveries.entry(sub.group.clone()).or_default();
        state.subs.insert(sub.group.clone(), sub);
        Ok(())
    }

    async fn unsubscribe(&self, group: &str) -> Result<()> {
        self.state.lock().await.subs.remove(group);
        Ok(())
    }

    async fn receive(&self, group: &str, max: usize) -> Result<Vec<Delivery>> {
        if group.trim().is_empty() {
            return Err(Error::InvalidConsumerGroup);
        }
        let now = Utc::now();
        let leased_until = add_std(now, self.cfg.lease);
        let max_deliveries = self.cfg.max_deliveries;

        let mut state = self.state.lock().await;
        let State {
            events,
            by_id,
            deliveries,
            ..
        } = &mut *state;
        let Some(rows) = deliveries.get_mut(group) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for row in rows.iter_mut() {
            if out.len() >= max {
                break;
            }
            if !matches!(row.status, DeliveryStatus::Pending | DeliveryStatus::Leased)
                || row.available_at > now
            {
                continue;
            }
            if row.attempts >= max_deliveries {
                tracing::warn!(group, event_id = %row.event_id, "delivery dead-lettered after lease expiry");
                row.status = DeliveryStatus::DeadLettered;
                continue;
            }
            let Some(event) = by_id.get(&row.event_id).map(|i| events[*i].clone()) else {
                continue;
            };
            row.attempts += 1;
            row.status = DeliveryStatus::Leased;
            row.available_at = leased_until;
            out.push(Delivery {
                group: group.to_string(),
                event,
                attempts: row.attempts,
                leased_until,
            });
        }
        Ok(out)
    }

    async fn ack(&self, group: &str, event_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = find_row(&mut state, group, event_id)?;
        row.status = DeliveryStatus::Acked;
        Ok(())
    }

    async fn nack(&self, group: &str, event_id: &str, reason: &str) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let row = find_row(&mut state, group, event_id)?;
        if row.status == DeliveryStatus::Acked {
            return Ok(());
        }
        row.last_error = Some(reason.to_string());
        if row.attempts >= self.cfg.max_deliveries {
            row.status = DeliveryStatus::DeadLettered;
            return Ok(());
        }
        row.status = DeliveryStatus::Pending;
        row.available_at = add_std(now, self.cfg.redelivery_backoff(row.attempts));
        Ok(())
    }

    async fn query(&self, filter: EventQuery) -> Result<Vec<Event>> {
        filter.validate()?;

        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| filter.accepts(e))
            .take(filter.limit)
            .cloned()
            .collect())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.state.lock().await.subs.values().cloned().collect())
    }
}

fn find_row<'a>(state: &'a mut State, group: &str, event_id: &str) -> Result<&'a mut DeliveryRow> {
    state
        .deliveries
        .get_mut(group)
        .and_then(|rows| rows.iter_mut().find(|r| r.event_id == event_id))
        .ok_or_else(|| Error::UnknownDelivery {
            group: group.to_string(),
            event_id: event_id.to_string(),
        })
}
