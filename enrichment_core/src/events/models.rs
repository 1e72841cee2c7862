use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// A durable event envelope routed through the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// ULID (sortable by time).
    pub id: String,
    /// Tenant/scope tag the event belongs to.
    pub scope: String,
    /// Dot-delimited topic, e.g. "enrichment.new_entity".
    pub topic: String,
    /// Producer identifier, e.g. "system:orchestrator" or "crm_import".
    pub source: String,
    pub payload: serde_json::Value,
    /// Idempotency key; publishing the same key twice within a scope is a no-op.
    pub dedupe_key: String,
    /// When the event occurred (domain timestamp).
    pub timestamp: DateTime<Utc>,
    /// When the bus accepted it.
    pub received_at: DateTime<Utc>,
    /// Trace context, producer hints, etc.
    pub metadata: serde_json::Value,
}

impl Event {
    #[tracing::instrument(level = "debug", skip(payload, metadata))]
    pub fn new(
        scope: impl Into<String> + std::fmt::Debug,
        topic: impl Into<String> + std::fmt::Debug,
        source: impl Into<String> + std::fmt::Debug,
        payload: serde_json::Value,
        dedupe_key: impl Into<String> + std::fmt::Debug,
        metadata: serde_json::Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let scope = scope.into();
        if scope.trim().is_empty() {
            return Err(Error::InvalidScope);
        }

        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(Error::InvalidTopic);
        }

        let source = source.into();
        if source.trim().is_empty() {
            return Err(Error::InvalidSource);
        }

        let dedupe_key = dedupe_key.into();
        if dedupe_key.trim().is_empty() {
            return Err(Error::InvalidDedupeKey);
        }

        let now = Utc::now();
        Ok(Self {
            id: ulid::Ulid::new().to_string(),
            scope,
            topic,
            source,
            payload,
            dedupe_key,
            timestamp: timestamp.unwrap_or(now),
            received_at: now,
            metadata,
        })
    }
}

/// A consumer group's interest in a set of topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Consumer group name; every group gets its own copy of each matching event.
    pub group: String,
    /// Glob topic patterns, e.g. "enrichment.new_*".
    pub topic_patterns: Vec<String>,
}

impl Subscription {
    #[tracing::instrument(level = "debug")]
    pub fn new(
        group: impl Into<String> + std::fmt::Debug,
        topic_patterns: Vec<String>,
    ) -> Result<Self> {
        let group = group.into();
        if group.trim().is_empty() {
            return Err(Error::InvalidConsumerGroup);
        }
        if topic_patterns.is_empty() || topic_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::InvalidTopicPattern);
        }
        Ok(Self {
            group,
            topic_patterns,
        })
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.topic_patterns.iter().any(|p| topic_matches(p, topic))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Leased,
    Acked,
    DeadLettered,
}

/// One event handed to one consumer group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub group: String,
    pub event: Event,
    /// How many times this delivery has been handed out, including this one.
    pub attempts: u32,
    pub leased_until: DateTime<Utc>,
}

impl Delivery {
    pub fn event_id(&self) -> &str {
        &self.event.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQuery {
    pub scope: Option<String>,
    pub topic: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl EventQuery {
    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::InvalidQuery);
        }
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(Error::InvalidQuery);
            }
        }
        Ok(())
    }

    pub fn accepts(&self, e: &Event) -> bool {
        if let Some(scope) = &self.scope {
            if &e.scope != scope {
                return false;
            }
        }
        if let Some(topic) = &self.topic {
            if &e.topic != topic {
                return false;
            }
        }
        if let Some(since) = self.since {
            if e.received_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if e.received_at > until {
                return false;
            }
        }
        true
    }
}

/// `at + d`, saturating instead of panicking on overflow.
pub(crate) fn add_std(at: DateTime<Utc>, d: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Simple glob: '*' matches any substring (including dots), '?' matches one char.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let p = pattern.as_bytes();
    let t = topic.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_match = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == t[ti] || p[pi] == b'?') {
            pi += 1;
            ti += 1;
            continue;
        }
        if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            pi += 1;
            star_match = ti;
            continue;
        }
        if let Some(s) = star {
            pi = s + 1;
            star_match += 1;
            ti = star_match;
            continue;
        }
        return false;
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}
