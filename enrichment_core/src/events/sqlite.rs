//! SQLite-backed EventBus implementation.
//!
//! Designed for single-node deployments where a broker is unavailable but
//! durable deliveries and checkpoints are required. Several worker processes may
//! share one database file; deliveries are claimed with a conditional update so
//! only one consumer holds a lease at a time.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::config::EventBusConfig;
use super::models::{Delivery, DeliveryStatus, Event, EventQuery, Subscription, add_std};
use super::traits::EventBus;
use super::{Error, Result};

#[derive(Clone)]
pub struct SqliteEventBus {
    cfg: EventBusConfig,
    pool: SqlitePool,
}

impl SqliteEventBus {
    pub async fn new(path: impl AsRef<Path>, cfg: EventBusConfig) -> Result<Self> {
        cfg.validate()?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend("sqlite_event_bus mkdir", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| Error::backend("sqlite_event_bus connect options", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("sqlite_event_bus connect", e))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::backend("sqlite_event_bus schema", e))?;

        Ok(Self { cfg, pool })
    }

    /// Dead-lettered event ids for a group, with the last nack reason.
    pub async fn dead_letters(&self, group: &str) -> Result<Vec<(String, Option<String>)>> {
        let rows = sqlx::query(
            r#"
SELECT event_id, last_error FROM enrichment_deliveries
WHERE group_name = ?1 AND status = ?2
ORDER BY seq ASC
"#,
        )
        .bind(group)
        .bind(status_to_str(DeliveryStatus::DeadLettered))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("event_id"), r.get("last_error")))
            .collect())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS enrichment_events (
  id TEXT PRIMARY KEY,
  scope TEXT NOT NULL,
  topic TEXT NOT NULL,
  source TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  dedupe_key TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  received_at TEXT NOT NULL,
  metadata_json TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS ee_scope_dedupe_idx ON enrichment_events(scope, dedupe_key);
CREATE INDEX IF NOT EXISTS ee_scope_topic_received_idx
  ON enrichment_events(scope, topic, received_at);

CREATE TABLE IF NOT EXISTS enrichment_subscriptions (
  group_name TEXT PRIMARY KEY,
  patterns_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS enrichment_deliveries (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  group_name TEXT NOT NULL,
  event_id TEXT NOT NULL,
  status TEXT NOT NULL,
  attempts INTEGER NOT NULL,
  available_at_ms INTEGER NOT NULL,
  last_error TEXT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS ed_group_event_idx ON enrichment_deliveries(group_name, event_id);
CREATE INDEX IF NOT EXISTS ed_group_status_available_idx
  ON enrichment_deliveries(group_name, status, available_at_ms);
"#;

#[async_trait]
impl EventBus for SqliteEventBus {
    #[tracing::instrument(level = "debug", skip_all, fields(topic = %event.topic))]
    async fn publish(&self, event: Event) -> Result<String> {
        if event.scope.trim().is_empty() {
            return Err(Error::InvalidScope);
        }
        if event.topic.trim().is_empty() {
            return Err(Error::InvalidTopic);
        }
        self.cfg.check_payload(&event.payload)?;

        let payload_json = serde_json::to_string(&event.payload)
            .map_err(|e| Error::backend("serialize payload", e))?;
        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|e| Error::backend("serialize metadata", e))?;

        let subs = self.list_subscriptions().await?;

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
INSERT INTO enrichment_events
  (id, scope, topic, source, payload_json, dedupe_key, timestamp, received_at, metadata_json)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(scope, dedupe_key) DO NOTHING
"#,
        )
        .bind(&event.id)
        .bind(&event.scope)
        .bind(&event.topic)
        .bind(&event.source)
        .bind(payload_json)
        .bind(&event.dedupe_key)
        .bind(fmt_dt(event.timestamp))
        .bind(fmt_dt(event.received_at))
        .bind(metadata_json)
        .execute(&mut *tx)
        .await?;

        if rows.rows_affected() == 0 {
            tx.rollback().await?;
            let existing = sqlx::query(
                r#"
SELECT id FROM enrichment_events
WHERE scope = ?1 AND dedupe_key = ?2
LIMIT 1
"#,
            )
            .bind(&event.scope)
            .bind(&event.dedupe_key)
            .fetch_optional(&self.pool)
            .await?;
            let id: String = existing
                .ok_or_else(|| Error::backend("publish dedupe", "existing row not found"))?
                .get("id");
            return Ok(id);
        }

        let available_at = event.received_at.timestamp_millis();
        for sub in subs.iter().filter(|s| s.matches(&event.topic)) {
            sqlx::query(
                r#"
INSERT INTO enrichment_deliveries
  (group_name, event_id, status, attempts, available_at_ms, last_error)
VALUES
  (?1, ?2, ?3, 0, ?4, NULL)
ON CONFLICT(group_name, event_id) DO NOTHING
"#,
            )
            .bind(&sub.group)
            .bind(&event.id)
            .bind(status_to_str(DeliveryStatus::Pending))
            .bind(available_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(event.id)
    }

    async fn subscribe(&self, sub: Subscription) -> Result<()> {
        let patterns_json = serde_json::to_string(&sub.topic_patterns)
            .map_err(|e| Error::backend("serialize topic patterns", e))?;
        sqlx::query(
            r#"
INSERT OR REPLACE INTO enrichment_subscriptions (group_name, patterns_json)
VALUES (?1, ?2)
"#,
        )
        .bind(&sub.group)
        .bind(patterns_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unsubscribe(&self, group: &str) -> Result<()> {
        sqlx::query("DELETE FROM enrichment_subscriptions WHERE group_name = ?1")
            .bind(group)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn receive(&self, group: &str, max: usize) -> Result<Vec<Delivery>> {
        if group.trim().is_empty() {
            return Err(Error::InvalidConsumerGroup);
        }
        let now = Utc::now();
        let leased_until = add_std(now, self.cfg.lease);

        let candidates = sqlx::query(
            r#"
SELECT d.event_id, d.attempts,
       e.id, e.scope, e.topic, e.source, e.payload_json, e.dedupe_key,
       e.timestamp, e.received_at, e.metadata_json
FROM enrichment_deliveries d
JOIN enrichment_events e ON e.id = d.event_id
WHERE d.group_name = ?1
  AND d.status IN (?2, ?3)
  AND d.available_at_ms <= ?4
ORDER BY d.seq ASC
LIMIT ?5
"#,
        )
        .bind(group)
        .bind(status_to_str(DeliveryStatus::Pending))
        .bind(status_to_str(DeliveryStatus::Leased))
        .bind(now.timestamp_millis())
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(candidates.len());
        for row in candidates {
            let event_id: String = row.get("event_id");
            let attempts = row.get::<i64, _>("attempts").max(0) as u32;

            if attempts >= self.cfg.max_deliveries {
                tracing::warn!(group, event_id = %event_id, "delivery dead-lettered after lease expiry");
                sqlx::query(
                    r#"
UPDATE enrichment_deliveries SET status = ?3
WHERE group_name = ?1 AND event_id = ?2
"#,
                )
                .bind(group)
                .bind(&event_id)
                .bind(status_to_str(DeliveryStatus::DeadLettered))
                .execute(&self.pool)
                .await?;
                continue;
            }

            // Claim: only succeeds if nobody else leased it since our SELECT.
            let claimed = sqlx::query(
                r#"
UPDATE enrichment_deliveries
SET status = ?4, attempts = attempts + 1, available_at_ms = ?5
WHERE group_name = ?1 AND event_id = ?2 AND attempts = ?3
  AND status IN (?6, ?7)
"#,
            )
            .bind(group)
            .bind(&event_id)
            .bind(attempts as i64)
            .bind(status_to_str(DeliveryStatus::Leased))
            .bind(leased_until.timestamp_millis())
            .bind(status_to_str(DeliveryStatus::Pending))
            .bind(status_to_str(DeliveryStatus::Leased))
            .execute(&self.pool)
            .await?;
            if claimed.rows_affected() == 0 {
                continue;
            }

            out.push(Delivery {
                group: group.to_string(),
                event: row_to_event(&row)?,
                attempts: attempts + 1,
                leased_until,
            });
        }
        Ok(out)
    }

    async fn ack(&self, group: &str, event_id: &str) -> Result<()> {
        let res = sqlx::query(
            r#"
UPDATE enrichment_deliveries SET status = ?3
WHERE group_name = ?1 AND event_id = ?2
"#,
        )
        .bind(group)
        .bind(event_id)
        .bind(status_to_str(DeliveryStatus::Acked))
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(Error::UnknownDelivery {
                group: group.to_string(),
                event_id: event_id.to_string(),
            });
        }
        Ok(())
    }

    async fn nack(&self, group: &str, event_id: &str, reason: &str) -> Result<()> {
        let row = sqlx::query(
            r#"
SELECT status, attempts FROM enrichment_deliveries
WHERE group_name = ?1 AND event_id = ?2
"#,
        )
        .bind(group)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::UnknownDelivery {
            group: group.to_string(),
            event_id: event_id.to_string(),
        })?;

        let status = status_from_str(row.get::<String, _>("status").as_str())?;
        if status == DeliveryStatus::Acked {
            return Ok(());
        }
        let attempts = row.get::<i64, _>("attempts").max(0) as u32;

        let (next, available_at) = if attempts >= self.cfg.max_deliveries {
            (DeliveryStatus::DeadLettered, Utc::now())
        } else {
            (
                DeliveryStatus::Pending,
                add_std(Utc::now(), self.cfg.redelivery_backoff(attempts)),
            )
        };

        sqlx::query(
            r#"
UPDATE enrichment_deliveries
SET status = ?3, available_at_ms = ?4, last_error = ?5
WHERE group_name = ?1 AND event_id = ?2
"#,
        )
        .bind(group)
        .bind(event_id)
        .bind(status_to_str(next))
        .bind(available_at.timestamp_millis())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, filter: EventQuery) -> Result<Vec<Event>> {
        filter.validate()?;

        let rows = sqlx::query(
            r#"
SELECT id, scope, topic, source, payload_json, dedupe_key, timestamp, received_at, metadata_json
FROM enrichment_events
ORDER BY received_at ASC, id ASC
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let event = row_to_event(&row)?;
            if !filter.accepts(&event) {
                continue;
            }
            out.push(event);
            if out.len() >= filter.limit {
                break;
            }
        }
        Ok(out)
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
SELECT group_name, patterns_json
FROM enrichment_subscriptions
ORDER BY group_name ASC
"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let patterns_json: String = row.get("patterns_json");
            out.push(Subscription {
                group: row.get("group_name"),
                topic_patterns: serde_json::from_str(&patterns_json)
                    .map_err(|e| Error::backend("decode topic patterns", e))?,
            });
        }
        Ok(out)
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
    let payload_json: String = row.get("payload_json");
    let metadata_json: String = row.get("metadata_json");

    Ok(Event {
        id: row.get("id"),
        scope: row.get("scope"),
        topic: row.get("topic"),
        source: row.get("source"),
        payload: serde_json::from_str(&payload_json)
            .map_err(|e| Error::backend("decode event payload", e))?,
        dedupe_key: row.get("dedupe_key"),
        timestamp: parse_dt(row.get::<String, _>("timestamp").as_str())?,
        received_at: parse_dt(row.get::<String, _>("received_at").as_str())?,
        metadata: serde_json::from_str(&metadata_json)
            .map_err(|e| Error::backend("decode event metadata", e))?,
    })
}

fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::backend("parse datetime", e))
}

fn status_to_str(v: DeliveryStatus) -> &'static str {
    match v {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Leased => "leased",
        DeliveryStatus::Acked => "acked",
        DeliveryStatus::DeadLettered => "dead_lettered",
    }
}

fn status_from_str(s: &str) -> Result<DeliveryStatus> {
    match s {
        "pending" => Ok(DeliveryStatus::Pending),
        "leased" => Ok(DeliveryStatus::Leased),
        "acked" => Ok(DeliveryStatus::Acked),
        "dead_lettered" => Ok(DeliveryStatus::DeadLettered),
        _ => Err(Error::backend("status_from_str", format!("unknown: {s}"))),
    }
}
