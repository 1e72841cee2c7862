use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{EnrichmentRecord, RecordLookup};
use super::traits::RecordStore;
use crate::models::{normalize_email, normalize_linkedin_handle};
use crate::{Error, Result};

/// In-process record store for tests and local runs.
///
/// `set_unavailable(true)` makes every call fail with `StoreUnavailable`, which is
/// how redelivery paths are exercised without a real outage.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<Uuid, EnrichmentRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Insert a record verbatim, bypassing the merge (fixtures with pre-existing duplicates).
    pub async fn insert_raw(&self, record: EnrichmentRecord) {
        self.records.write().await.insert(record.uuid, record);
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::store(
                format!("memory_record_store {op}"),
                std::io::Error::other("store marked unavailable"),
            ));
        }
        Ok(())
    }
}

fn oldest<'a>(it: impl Iterator<Item = &'a EnrichmentRecord>) -> Option<EnrichmentRecord> {
    it.min_by_key(|r| (r.created_at, r.uuid)).cloned()
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, lookup: &RecordLookup) -> Result<Option<EnrichmentRecord>> {
        self.check("get")?;
        let records = self.records.read().await;
        Ok(match lookup {
            RecordLookup::Uuid(id) => records.get(id).cloned(),
            RecordLookup::Email(email) => {
                let Some(email) = normalize_email(email) else {
                    return Ok(None);
                };
                oldest(
                    records
                        .values()
                        .filter(|r| r.email.as_deref() == Some(email.as_str())),
                )
            }
            RecordLookup::Handle(handle) => {
                let Some(handle) = normalize_linkedin_handle(handle) else {
                    return Ok(None);
                };
                oldest(
                    records
                        .values()
                        .filter(|r| r.linkedin_handle.as_deref() == Some(handle.as_str())),
                )
            }
        })
    }

    async fn upsert(&self, record: &EnrichmentRecord) -> Result<EnrichmentRecord> {
        self.check("upsert")?;
        let mut incoming = record.clone();
        incoming.normalize();

        let mut records = self.records.write().await;
        let stored = match records.get_mut(&incoming.uuid) {
            Some(existing) => {
                existing.merge_from(&incoming);
                existing.clone()
            }
            None => {
                records.insert(incoming.uuid, incoming.clone());
                incoming
            }
        };
        Ok(stored)
    }

    async fn exists_handle(&self, handle: &str) -> Result<bool> {
        self.check("exists_handle")?;
        let Some(handle) = normalize_linkedin_handle(handle) else {
            return Ok(false);
        };
        Ok(self
            .records
            .read()
            .await
            .values()
            .any(|r| r.linkedin_handle.as_deref() == Some(handle.as_str())))
    }

    async fn find_all_by_email(&self, email: &str) -> Result<Vec<EnrichmentRecord>> {
        self.check("find_all_by_email")?;
        let Some(email) = normalize_email(email) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<EnrichmentRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.email.as_deref() == Some(email.as_str()))
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.created_at, r.uuid));
        Ok(out)
    }

    async fn duplicate_emails(&self) -> Result<Vec<String>> {
        self.check("duplicate_emails")?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for r in self.records.read().await.values() {
            if let Some(email) = &r.email {
                *counts.entry(email.clone()).or_default() += 1;
            }
        }
        let mut dups: Vec<String> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(e, _)| e)
            .collect();
        dups.sort();
        Ok(dups)
    }

    async fn delete(&self, uuid: Uuid) -> Result<bool> {
        self.check("delete")?;
        Ok(self.records.write().await.remove(&uuid).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use crate::records::models::{ProfileFields, ProviderKind, ProviderState, ProviderStatus};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn lookups_normalize_their_keys() {
        let store = MemoryRecordStore::new();
        let id = Identity {
            email: Some("Jane@Example.com".into()),
            linkedin_handle: Some("linkedin.com/in/JaneDoe".into()),
            ..Identity::default()
        };
        let rec = EnrichmentRecord::new(&id, Utc::now());
        store.upsert(&rec).await.unwrap();

        let by_email = store
            .get(&RecordLookup::Email(" jane@example.COM ".into()))
            .await
            .unwrap();
        assert_eq!(by_email.map(|r| r.uuid), Some(rec.uuid));
        assert!(store.exists_handle("https://www.linkedin.com/in/janedoe/").await.unwrap());
        assert!(!store.exists_handle("someone-else").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_merges_instead_of_overwriting() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();
        let mut rec = EnrichmentRecord::new(&Identity::from_email("a@b.com"), now);
        rec.apply_provider_state(
            ProviderKind::ContactsProvider,
            ProviderState::fetched(now, serde_json::json!({}), ProfileFields::default()),
        );
        store.upsert(&rec).await.unwrap();

        // A concurrent writer that loaded the record before the fetch landed.
        let mut stale = rec.clone();
        stale.providers.insert(
            ProviderKind::ContactsProvider,
            ProviderState::failed(&ProviderState::default(), now - Duration::hours(1), "timeout"),
        );
        let stored = store.upsert(&stale).await.unwrap();
        assert_eq!(
            stored.provider(ProviderKind::ContactsProvider).status,
            ProviderStatus::Fetched
        );
    }

    #[tokio::test]
    async fn unavailable_store_fails_with_redeliverable_error() {
        let store = MemoryRecordStore::new();
        store.set_unavailable(true);
        let err = store
            .get(&RecordLookup::Email("a@b.com".into()))
            .await
            .unwrap_err();
        assert!(err.is_redeliverable());
    }
}
