use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::canonical::Canonicalizer;
use crate::events::models::Event;
use crate::events::traits::EventBus;
use crate::messages::{InboundEvent, OutboundEvent};
use crate::models::{FetchIdentity, Identity};
use crate::providers::{FetchFailure, ProviderAdapter, ProviderPayload};
use crate::records::models::{EnrichmentRecord, ProviderKind, ProviderState, RecordLookup};
use crate::records::traits::RecordStore;
use crate::retry::{RetryFailure, RetryPolicy, retry_with_backoff};
use crate::staleness::StalenessPolicy;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Scope stamped on outbound events.
    pub scope: String,
    /// `source` stamped on outbound events.
    pub source: String,
    /// Providers in the order they are consulted within one pass.
    pub priority: Vec<ProviderKind>,
    pub retry: RetryPolicy,
    pub staleness: StalenessPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scope: "default".to_string(),
            source: "system:enrichment_orchestrator".to_string(),
            priority: vec![
                ProviderKind::ContactsProvider,
                ProviderKind::GraphProvider,
                ProviderKind::SocialScraper,
            ],
            retry: RetryPolicy::default(),
            staleness: StalenessPolicy::default(),
        }
    }
}

/// What one handled message did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassOutcome {
    pub uuid: Option<Uuid>,
    pub created: bool,
    pub fetched: Vec<ProviderKind>,
    pub failed: Vec<ProviderKind>,
    /// Topics published, in order.
    pub published: Vec<String>,
}

/// Drives the per-provider fetch state machine for one entity per message.
pub struct EnrichmentOrchestrator {
    store: Arc<dyn RecordStore>,
    bus: Arc<dyn EventBus>,
    adapters: BTreeMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    canonicalizer: Canonicalizer,
    cfg: OrchestratorConfig,
}

impl EnrichmentOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        bus: Arc<dyn EventBus>,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            bus,
            adapters: BTreeMap::new(),
            canonicalizer: Canonicalizer::default(),
            cfg,
        }
    }

    /// Register an adapter; a later adapter of the same kind replaces an earlier one.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub async fn handle(&self, event: &Event) -> Result<PassOutcome> {
        self.handle_at(event, Utc::now()).await
    }

    /// Handle one inbound event. Every timestamp written during the pass is `now`.
    #[tracing::instrument(level = "debug", skip_all, fields(event_id = %event.id, topic = %event.topic))]
    pub async fn handle_at(&self, event: &Event, now: DateTime<Utc>) -> Result<PassOutcome> {
        let inbound = InboundEvent::parse(event)?;
        let identity = inbound.identity();

        let mut outcome = PassOutcome::default();
        let (mut record, created) = self.load_or_create(&identity, now).await?;
        outcome.uuid = Some(record.uuid);
        outcome.created = created;

        let mut attempted = false;
        for kind in self.cfg.priority.clone() {
            let Some(adapter) = self.adapters.get(&kind).cloned() else {
                continue;
            };
            // Re-evaluated per provider: a handle learned earlier in this pass counts.
            if !self.cfg.staleness.provider_due(&record, kind, now) {
                continue;
            }
            attempted = true;

            let fetch_id = record.identity().fetch_identity();
            match self.fetch_with_retry(adapter.as_ref(), &fetch_id).await {
                Ok(payload) => {
                    record = self.record_success(record, kind, payload, now).await?;
                    outcome.fetched.push(kind);
                }
                Err(failure) => {
                    let reason = provider_error(kind, &failure).to_string();
                    tracing::info!(provider = %kind, uuid = %record.uuid, %reason, "provider fetch failed");
                    record = self.record_failure(record, kind, &reason, now).await?;
                    outcome.failed.push(kind);
                    self.publish(
                        OutboundEvent::Failed {
                            identity: record.identity(),
                            provider: Some(kind),
                            reason,
                        },
                        event,
                        &mut outcome,
                    )
                    .await?;
                }
            }
        }

        let summary = if !outcome.fetched.is_empty() {
            OutboundEvent::Updated {
                person: record.person(),
            }
        } else if self.cfg.staleness.has_fresh_data(&record, now) {
            OutboundEvent::UpToDate {
                person: record.person(),
            }
        } else {
            let reason = if attempted {
                "every due provider failed"
            } else {
                "no provider due and no fresh data"
            };
            OutboundEvent::Failed {
                identity: record.identity(),
                provider: None,
                reason: reason.to_string(),
            }
        };
        self.publish(summary, event, &mut outcome).await?;

        tracing::info!(
            uuid = %record.uuid,
            created = outcome.created,
            fetched = ?outcome.fetched,
            failed = ?outcome.failed,
            "enrichment pass complete"
        );
        Ok(outcome)
    }

    /// Find the record by uuid, then handle, then email; create it when absent.
    async fn load_or_create(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(EnrichmentRecord, bool)> {
        let mut lookups = Vec::new();
        if let Some(uuid) = identity.uuid {
            lookups.push(RecordLookup::Uuid(uuid));
        }
        if let Some(handle) = &identity.linkedin_handle {
            lookups.push(RecordLookup::Handle(handle.clone()));
        }
        if let Some(email) = &identity.email {
            lookups.push(RecordLookup::Email(email.clone()));
        }

        for lookup in &lookups {
            if let Some(mut record) = self.store.get(lookup).await? {
                if record.attach_identity(identity, now) {
                    record = self.store.upsert(&record).await?;
                }
                return Ok((record, false));
            }
        }

        let record = EnrichmentRecord::new(identity, now);
        let record = self.store.upsert(&record).await?;
        tracing::debug!(uuid = %record.uuid, "created enrichment record");
        Ok((record, true))
    }

    async fn fetch_with_retry(
        &self,
        adapter: &dyn ProviderAdapter,
        identity: &FetchIdentity,
    ) -> std::result::Result<ProviderPayload, RetryFailure<FetchFailure>> {
        retry_with_backoff(&self.cfg.retry, FetchFailure::class, |_attempt| async move {
            adapter.fetch(identity).await.into_result()
        })
        .await
    }

    async fn record_success(
        &self,
        mut record: EnrichmentRecord,
        kind: ProviderKind,
        payload: ProviderPayload,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentRecord> {
        let ProviderPayload { raw, fields, posts } = payload;
        record.apply_provider_state(kind, ProviderState::fetched(now, raw, fields));
        if !posts.is_empty() {
            record.merge_posts(&posts);
        }
        let changed = self.canonicalizer.canonicalize(&mut record);
        record.touch(now);
        tracing::debug!(provider = %kind, changed = ?changed, "provider fetch stored");
        self.store.upsert(&record).await
    }

    async fn record_failure(
        &self,
        mut record: EnrichmentRecord,
        kind: ProviderKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentRecord> {
        let state = ProviderState::failed(record.provider(kind), now, reason);
        record.apply_provider_state(kind, state);
        record.touch(now);
        self.store.upsert(&record).await
    }

    async fn publish(
        &self,
        out: OutboundEvent,
        cause: &Event,
        outcome: &mut PassOutcome,
    ) -> Result<()> {
        let topic = out.topic();
        let event = out.into_event(&self.cfg.scope, &self.cfg.source, cause)?;
        self.bus.publish(event).await?;
        outcome.published.push(topic.to_string());
        Ok(())
    }
}

fn provider_error(kind: ProviderKind, failure: &RetryFailure<FetchFailure>) -> Error {
    match &failure.error {
        FetchFailure::NotFound => Error::ProviderNotFound {
            provider: kind,
            message: failure.error.to_string(),
        },
        other => Error::ProviderTransient {
            provider: kind,
            attempts: failure.attempts,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::memory::MemoryEventBus;
    use crate::events::models::Subscription;
    use crate::messages::topics;
    use crate::orchestrator::testing::{ScriptedProvider, profile};
    use crate::providers::ProviderResult;
    use crate::records::memory::MemoryRecordStore;
    use crate::records::models::ProviderStatus;
    use chrono::{Duration, TimeZone};

    struct Harness {
        store: MemoryRecordStore,
        bus: MemoryEventBus,
        contacts: Arc<ScriptedProvider>,
        graph: Arc<ScriptedProvider>,
        social: Arc<ScriptedProvider>,
        orch: EnrichmentOrchestrator,
    }

    fn harness(contacts: ScriptedProvider, graph: ScriptedProvider, social: ScriptedProvider) -> Harness {
        let cfg = OrchestratorConfig {
            retry: RetryPolicy::immediate(3),
            ..OrchestratorConfig::default()
        };
        harness_with(cfg, contacts, graph, social)
    }

    fn harness_with(
        cfg: OrchestratorConfig,
        contacts: ScriptedProvider,
        graph: ScriptedProvider,
        social: ScriptedProvider,
    ) -> Harness {
        let store = MemoryRecordStore::new();
        let bus = MemoryEventBus::new();
        let contacts = Arc::new(contacts);
        let graph = Arc::new(graph);
        let social = Arc::new(social);
        let orch = EnrichmentOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(bus.clone()),
            cfg,
        )
        .with_adapter(contacts.clone())
        .with_adapter(graph.clone())
        .with_adapter(social.clone());
        Harness {
            store,
            bus,
            contacts,
            graph,
            social,
            orch,
        }
    }

    fn not_found(kind: ProviderKind) -> ScriptedProvider {
        ScriptedProvider::new(kind, ProviderResult::NotFound)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn new_entity(identity: serde_json::Value) -> Event {
        Event::new(
            "acme",
            topics::NEW_ENTITY,
            "test",
            serde_json::json!({ "identity": identity }),
            ulid::Ulid::new().to_string(),
            serde_json::json!({}),
            None,
        )
        .unwrap()
    }

    async fn topics_published(bus: &MemoryEventBus) -> Vec<String> {
        bus.all_events().await.into_iter().map(|e| e.topic).collect()
    }

    #[tokio::test]
    async fn email_only_entity_is_enriched_from_contacts() {
        let h = harness(
            ScriptedProvider::new(ProviderKind::ContactsProvider, profile("Jane Doe", "Acme", None)),
            not_found(ProviderKind::GraphProvider),
            not_found(ProviderKind::SocialScraper),
        );

        let out = h
            .orch
            .handle_at(&new_entity(serde_json::json!({"email": "a@b.com"})), t0())
            .await
            .unwrap();
        assert!(out.created);
        assert_eq!(out.fetched, vec![ProviderKind::ContactsProvider]);
        assert_eq!(h.graph.calls() + h.social.calls(), 0);

        let rec = h
            .store
            .get(&RecordLookup::Email("a@b.com".into()))
            .await
            .unwrap()
            .unwrap();
        let contacts = rec.provider(ProviderKind::ContactsProvider);
        assert_eq!(contacts.status, ProviderStatus::Fetched);
        assert_eq!(contacts.last_updated, Some(t0()));
        assert!(contacts.raw_payload.is_some());
        assert_eq!(rec.name.as_deref(), Some("Jane Doe"));
        assert_eq!(rec.company.as_deref(), Some("Acme"));

        let updated = h.bus.events_on(topics::UPDATED).await;
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].payload["person"]["company"], "Acme");
    }

    #[tokio::test]
    async fn repeated_request_within_ttl_makes_no_provider_calls() {
        let h = harness(
            ScriptedProvider::new(ProviderKind::ContactsProvider, profile("Jane", "Acme", Some("jane"))),
            ScriptedProvider::new(ProviderKind::GraphProvider, profile("Jane Doe", "Graph Co", None)),
            not_found(ProviderKind::SocialScraper),
        );
        let identity = serde_json::json!({"email": "a@b.com"});

        h.orch.handle_at(&new_entity(identity.clone()), t0()).await.unwrap();
        let second = h
            .orch
            .handle_at(&new_entity(identity), t0() + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(h.contacts.calls(), 1);
        assert_eq!(h.graph.calls(), 1);
        assert_eq!(h.social.calls(), 1);
        assert!(second.fetched.is_empty() && second.failed.is_empty());
        assert_eq!(second.published, vec![topics::UP_TO_DATE.to_string()]);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn newer_sibling_data_escalates_a_failed_provider() {
        let cfg = OrchestratorConfig {
            retry: RetryPolicy::immediate(3),
            staleness: StalenessPolicy {
                profile_ttl: Duration::days(30),
                posts_ttl: Duration::days(30),
                failed_ttl: Duration::days(60),
            },
            ..OrchestratorConfig::default()
        };
        let h = harness_with(
            cfg,
            ScriptedProvider::new(ProviderKind::ContactsProvider, profile("Jane", "Acme", None)),
            ScriptedProvider::new(ProviderKind::GraphProvider, profile("Jane Doe", "Graph Co", None))
                .then(ProviderResult::NotFound),
            not_found(ProviderKind::SocialScraper).then(ProviderResult::NotFound),
        );
        let identity = serde_json::json!({"email": "a@b.com", "linkedin_handle": "jane"});

        // Contacts succeeds, graph and social fail, all at t0.
        h.orch.handle_at(&new_entity(identity.clone()), t0()).await.unwrap();
        assert_eq!((h.contacts.calls(), h.graph.calls(), h.social.calls()), (1, 1, 1));

        // Same-instant sibling data does not escalate; failures are still suppressed.
        let quiet = h
            .orch
            .handle_at(&new_entity(identity.clone()), t0() + Duration::days(10))
            .await
            .unwrap();
        assert_eq!(quiet.published, vec![topics::UP_TO_DATE.to_string()]);
        assert_eq!((h.contacts.calls(), h.graph.calls(), h.social.calls()), (1, 1, 1));

        // Contacts refreshes after its TTL; its newer data re-opens the failed providers
        // in the same pass even though their failure TTL has not elapsed.
        let later = t0() + Duration::days(31);
        let out = h.orch.handle_at(&new_entity(identity), later).await.unwrap();
        assert_eq!(h.contacts.calls(), 2);
        assert_eq!(h.graph.calls(), 2);
        assert_eq!(h.social.calls(), 2);
        assert_eq!(
            out.fetched,
            vec![ProviderKind::ContactsProvider, ProviderKind::GraphProvider]
        );
        assert_eq!(out.failed, vec![ProviderKind::SocialScraper]);

        let rec = h
            .store
            .get(&RecordLookup::Email("a@b.com".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            rec.provider(ProviderKind::GraphProvider).last_updated,
            Some(later)
        );
        assert_eq!(rec.company.as_deref(), Some("Graph Co"));
    }

    #[tokio::test]
    async fn handle_learned_from_contacts_unlocks_graph_in_the_same_pass() {
        let h = harness(
            ScriptedProvider::new(
                ProviderKind::ContactsProvider,
                profile("J Doe", "Contacts Co", Some("https://linkedin.com/in/JaneDoe")),
            ),
            ScriptedProvider::new(ProviderKind::GraphProvider, profile("Jane Doe", "Graph Co", None)),
            not_found(ProviderKind::SocialScraper),
        );
        let out = h
            .orch
            .handle_at(
                &new_entity(serde_json::json!({"email": "a@b.com", "position": "CTO"})),
                t0(),
            )
            .await
            .unwrap();

        assert_eq!(
            out.fetched,
            vec![ProviderKind::ContactsProvider, ProviderKind::GraphProvider]
        );
        assert_eq!(out.failed, vec![ProviderKind::SocialScraper]);
        assert_eq!(
            h.graph.seen()[0].linkedin_handle.as_deref(),
            Some("janedoe")
        );

        let rec = h
            .store
            .get(&RecordLookup::Handle("janedoe".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.company.as_deref(), Some("Graph Co"));
        assert_eq!(rec.name.as_deref(), Some("Jane Doe"));
        assert_eq!(rec.position.as_deref(), Some("CTO"));
        assert_eq!(
            topics_published(&h.bus).await,
            vec![topics::FAILED.to_string(), topics::UPDATED.to_string()]
        );
    }

    #[tokio::test]
    async fn caller_company_survives_provider_value() {
        let h = harness(
            ScriptedProvider::new(ProviderKind::ContactsProvider, profile("Jane", "Other", None)),
            not_found(ProviderKind::GraphProvider),
            not_found(ProviderKind::SocialScraper),
        );
        h.orch
            .handle_at(
                &new_entity(serde_json::json!({"email": "a@b.com", "company": "Acme"})),
                t0(),
            )
            .await
            .unwrap();
        let rec = h
            .store
            .get(&RecordLookup::Email("a@b.com".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.company.as_deref(), Some("Acme"));
        assert_eq!(rec.name.as_deref(), Some("Jane"));
    }

    #[tokio::test]
    async fn not_found_is_recorded_without_retry_and_reported() {
        let h = harness(
            not_found(ProviderKind::ContactsProvider),
            not_found(ProviderKind::GraphProvider),
            not_found(ProviderKind::SocialScraper),
        );
        let out = h
            .orch
            .handle_at(&new_entity(serde_json::json!({"email": "a@b.com"})), t0())
            .await
            .unwrap();
        assert_eq!(h.contacts.calls(), 1);
        assert_eq!(out.failed, vec![ProviderKind::ContactsProvider]);

        let failed = h.bus.events_on(topics::FAILED).await;
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].payload["provider"], "contacts_provider");
        assert!(failed[1].payload["provider"].is_null());

        let rec = h
            .store
            .get(&RecordLookup::Email("a@b.com".into()))
            .await
            .unwrap()
            .unwrap();
        let state = rec.provider(ProviderKind::ContactsProvider);
        assert_eq!(state.status, ProviderStatus::TriedButFailed);
        assert_eq!(state.last_updated, Some(t0()));

        // Inside the failure window nothing is called again.
        h.orch
            .handle_at(
                &new_entity(serde_json::json!({"email": "a@b.com"})),
                t0() + Duration::days(1),
            )
            .await
            .unwrap();
        assert_eq!(h.contacts.calls(), 1);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_retry_budget() {
        let h = harness(
            ScriptedProvider::new(ProviderKind::ContactsProvider, ProviderResult::RateLimited),
            not_found(ProviderKind::GraphProvider),
            not_found(ProviderKind::SocialScraper),
        );
        h.orch
            .handle_at(&new_entity(serde_json::json!({"email": "a@b.com"})), t0())
            .await
            .unwrap();
        assert_eq!(h.contacts.calls(), 3);

        let failed = h.bus.events_on(topics::FAILED).await;
        let reason = failed[0].payload["reason"].as_str().unwrap_or_default();
        assert!(reason.contains("3 attempts"), "{reason}");
    }

    #[tokio::test]
    async fn transient_then_success_is_a_success() {
        let h = harness(
            ScriptedProvider::new(ProviderKind::ContactsProvider, profile("Jane", "Acme", None))
                .then(ProviderResult::Unreachable("connect refused".into()))
                .then(ProviderResult::TransientError("502".into())),
            not_found(ProviderKind::GraphProvider),
            not_found(ProviderKind::SocialScraper),
        );
        let out = h
            .orch
            .handle_at(&new_entity(serde_json::json!({"email": "a@b.com"})), t0())
            .await
            .unwrap();
        assert_eq!(h.contacts.calls(), 3);
        assert_eq!(out.fetched, vec![ProviderKind::ContactsProvider]);
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid_input_and_creates_nothing() {
        let h = harness(
            not_found(ProviderKind::ContactsProvider),
            not_found(ProviderKind::GraphProvider),
            not_found(ProviderKind::SocialScraper),
        );
        let err = h
            .orch
            .handle_at(&new_entity(serde_json::json!({"name": "Nobody"})), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!err.is_redeliverable());
        assert!(h.store.is_empty().await);
        assert!(h.bus.all_events().await.is_empty());
    }

    #[tokio::test]
    async fn store_outage_aborts_with_redeliverable_error() {
        let h = harness(
            not_found(ProviderKind::ContactsProvider),
            not_found(ProviderKind::GraphProvider),
            not_found(ProviderKind::SocialScraper),
        );
        h.store.set_unavailable(true);
        let err = h
            .orch
            .handle_at(&new_entity(serde_json::json!({"email": "a@b.com"})), t0())
            .await
            .unwrap_err();
        assert!(err.is_redeliverable());
        assert_eq!(h.contacts.calls(), 0);
    }

    #[tokio::test]
    async fn consumer_acks_after_a_full_pass() {
        use crate::orchestrator::consumer::{ConsumerConfig, ConsumerRunner};

        let h = harness(
            ScriptedProvider::new(ProviderKind::ContactsProvider, profile("Jane", "Acme", None)),
            not_found(ProviderKind::GraphProvider),
            not_found(ProviderKind::SocialScraper),
        );
        let bus = h.bus.clone();
        let runner = ConsumerRunner::new(
            Arc::new(bus.clone()),
            Arc::new(h.orch),
            ConsumerConfig::default(),
        );
        runner.subscribe().await.unwrap();
        bus.subscribe(Subscription::new("downstream", vec!["enrichment.up*".into()]).unwrap())
            .await
            .unwrap();

        bus.publish(new_entity(serde_json::json!({"email": "a@b.com"})))
            .await
            .unwrap();
        let stats = runner.run_once().await.unwrap();
        assert_eq!(stats.acked, 1);
        assert_eq!(bus.outstanding("enrichment").await, 0);
        assert_eq!(bus.receive("downstream", 10).await.unwrap().len(), 1);
    }
}
