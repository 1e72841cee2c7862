//! Assembles stores, bus, adapters and the consumer from configuration.

use std::sync::Arc;

use enrichment_core::events::models::Event;
use enrichment_core::events::sqlite::SqliteEventBus;
use enrichment_core::events::traits::EventBus;
use enrichment_core::records::{ReconcileReport, reconcile_all, reconcile_duplicates};
use enrichment_core::{
    ConsumerRunner, EnrichmentConfig, EnrichmentOrchestrator, Error, Identity, InboundEvent,
    ProviderAdapter, RecordStore, Result, SqliteRecordStore,
};

/// Opened durable backends.
#[derive(Clone)]
pub struct Backends {
    pub bus: Arc<SqliteEventBus>,
    pub store: Arc<SqliteRecordStore>,
}

impl Backends {
    pub async fn open(cfg: &EnrichmentConfig) -> Result<Self> {
        let bus = SqliteEventBus::new(cfg.events_db_path(), cfg.bus.clone()).await?;
        let store = SqliteRecordStore::new(cfg.records_db_path()).await?;
        tracing::info!(data_dir = %cfg.data_dir.display(), "backends opened");
        Ok(Self {
            bus: Arc::new(bus),
            store: Arc::new(store),
        })
    }
}

pub fn build_runner(
    cfg: &EnrichmentConfig,
    backends: &Backends,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
) -> ConsumerRunner {
    let bus: Arc<dyn EventBus> = backends.bus.clone();
    let store: Arc<dyn RecordStore> = backends.store.clone();

    let mut orchestrator = EnrichmentOrchestrator::new(store, bus.clone(), cfg.orchestrator());
    for adapter in adapters {
        tracing::info!(provider = %adapter.kind(), "provider adapter enabled");
        orchestrator = orchestrator.with_adapter(adapter);
    }
    ConsumerRunner::new(bus, Arc::new(orchestrator), cfg.consumer())
}

/// Publish a `new_entity` request for `identity`. Returns the event id.
pub async fn enqueue(cfg: &EnrichmentConfig, bus: &dyn EventBus, identity: Identity) -> Result<String> {
    if identity.normalized().is_empty() {
        return Err(Error::InvalidInput(
            "need at least one of --email, --linkedin, --uuid".to_string(),
        ));
    }
    let inbound = InboundEvent::NewEntity { identity };
    let event = Event::new(
        cfg.scope.clone(),
        inbound.topic(),
        "cli:enqueue",
        inbound.payload(),
        inbound.dedupe_key(),
        serde_json::json!({}),
        None,
    )?;
    Ok(bus.publish(event).await?)
}

pub async fn reconcile(store: &dyn RecordStore, email: Option<&str>) -> Result<Vec<ReconcileReport>> {
    match email {
        Some(email) => Ok(reconcile_duplicates(store, email).await?.into_iter().collect()),
        None => reconcile_all(store).await,
    }
}

/// Configuration as printable JSON with credentials masked.
pub fn redacted_config(cfg: &EnrichmentConfig) -> serde_json::Value {
    fn redact(s: &str) -> String {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() <= 8 {
            return "***".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}***{tail}")
    }
    let endpoint = |ep: &Option<enrichment_core::EndpointConfig>| {
        ep.as_ref().map(|e| {
            serde_json::json!({
                "base_url": e.base_url,
                "credential": e.credential.as_deref().map(redact),
            })
        })
    };
    serde_json::json!({
        "data_dir": cfg.data_dir.display().to_string(),
        "scope": cfg.scope,
        "consumer_group": cfg.consumer_group,
        "batch_size": cfg.batch_size,
        "poll_interval_ms": cfg.poll_interval.as_millis() as u64,
        "handler_timeout_ms": cfg.handler_timeout.as_millis() as u64,
        "lease_ms": cfg.bus.lease.as_millis() as u64,
        "max_deliveries": cfg.bus.max_deliveries,
        "ttl_days": {
            "profile": cfg.staleness.profile_ttl.num_days(),
            "posts": cfg.staleness.posts_ttl.num_days(),
            "failed": cfg.staleness.failed_ttl.num_days(),
        },
        "retry": {
            "max_attempts": cfg.retry.max_attempts,
            "base_ms": cfg.retry.base_delay.as_millis() as u64,
            "max_delay_ms": cfg.retry.max_delay.as_millis() as u64,
            "jitter_ms": cfg.retry.max_jitter.as_millis() as u64,
        },
        "priority": cfg.priority.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
        "providers": {
            "graph": endpoint(&cfg.providers.graph),
            "contacts": endpoint(&cfg.providers.contacts),
            "social": endpoint(&cfg.providers.social),
            "timeout_ms": cfg.providers.timeout.as_millis() as u64,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrichment_core::{EnrichmentRecord, RecordLookup, topics};

    fn config(dir: &std::path::Path) -> EnrichmentConfig {
        EnrichmentConfig {
            data_dir: dir.to_path_buf(),
            ..EnrichmentConfig::default()
        }
    }

    #[tokio::test]
    async fn enqueued_entity_is_consumed_and_acked() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let backends = Backends::open(&cfg).await.unwrap();
        let runner = build_runner(&cfg, &backends, Vec::new());
        runner.subscribe().await.unwrap();

        enqueue(&cfg, backends.bus.as_ref(), Identity::from_email("Jane@Example.com"))
            .await
            .unwrap();
        let stats = runner.run_once().await.unwrap();
        assert_eq!((stats.received, stats.acked), (1, 1));
        assert!(runner.run_once().await.unwrap().received == 0);

        let rec = backends
            .store
            .get(&RecordLookup::Email("jane@example.com".into()))
            .await
            .unwrap();
        assert!(rec.is_some());

        // No adapters configured: the pass reports an aggregate failure.
        let failed = backends
            .bus
            .query(enrichment_core::events::models::EventQuery {
                topic: Some(topics::FAILED.to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_identity() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let backends = Backends::open(&cfg).await.unwrap();
        let err = enqueue(&cfg, backends.bus.as_ref(), Identity::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn reconcile_collapses_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let backends = Backends::open(&cfg).await.unwrap();
        let now = chrono::Utc::now();
        for _ in 0..2 {
            let rec = EnrichmentRecord::new(&Identity::from_email("a@b.com"), now);
            backends.store.upsert(&rec).await.unwrap();
        }

        let reports = reconcile(backends.store.as_ref(), None).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].merged.len(), 1);
        assert!(reconcile(backends.store.as_ref(), Some("a@b.com")).await.unwrap().is_empty());
    }

    #[test]
    fn config_output_masks_credentials() {
        let mut cfg = EnrichmentConfig::default();
        cfg.providers.graph = Some(enrichment_core::EndpointConfig {
            base_url: "https://graph.example.com".into(),
            credential: Some("supersecrettoken".into()),
        });
        let out = redacted_config(&cfg);
        assert_eq!(out["providers"]["graph"]["credential"], "supe***oken");
        assert!(out["providers"]["contacts"].is_null());
    }
}
