//! Offline repair of records that ended up duplicated by email.
//!
//! The normal enrichment path looks records up by email before creating one, but
//! two consumers racing on the same new email can both create a record. This pass
//! keeps the most complete record, folds the others into it and deletes them.

use serde::Serialize;
use uuid::Uuid;

use super::models::EnrichmentRecord;
use super::traits::RecordStore;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub email: String,
    pub kept: Uuid,
    pub merged: Vec<Uuid>,
}

/// Collapse every record sharing `email` into one. Returns `None` when there is
/// nothing to reconcile.
#[tracing::instrument(level = "info", skip(store))]
pub async fn reconcile_duplicates(
    store: &dyn RecordStore,
    email: &str,
) -> Result<Option<ReconcileReport>> {
    let records = store.find_all_by_email(email).await?;
    if records.len() < 2 {
        return Ok(None);
    }

    // Most complete wins; ties go to the oldest (records arrive ordered by created_at).
    let keeper_idx = records
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| {
            a.completeness()
                .cmp(&b.completeness())
                .then_with(|| ib.cmp(ia))
        })
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut keeper: EnrichmentRecord = records[keeper_idx].clone();
    let mut merged = Vec::new();
    for (i, other) in records.iter().enumerate() {
        if i == keeper_idx {
            continue;
        }
        keeper.absorb(other);
        merged.push(other.uuid);
    }

    store.upsert(&keeper).await?;
    for uuid in &merged {
        store.delete(*uuid).await?;
    }

    tracing::info!(kept = %keeper.uuid, merged = merged.len(), "reconciled duplicate records");
    Ok(Some(ReconcileReport {
        email: keeper.email.clone().unwrap_or_else(|| email.to_string()),
        kept: keeper.uuid,
        merged,
    }))
}

/// Reconcile every email the store reports as duplicated.
pub async fn reconcile_all(store: &dyn RecordStore) -> Result<Vec<ReconcileReport>> {
    let mut reports = Vec::new();
    for email in store.duplicate_emails().await? {
        if let Some(report) = reconcile_duplicates(store, &email).await? {
            reports.push(report);
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use crate::records::memory::MemoryRecordStore;
    use crate::records::models::{ProfileFields, ProviderKind, ProviderState, RecordLookup};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn keeps_most_complete_record_and_folds_the_rest() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();

        let sparse = EnrichmentRecord::new(&Identity::from_email("a@b.com"), now);
        let mut rich = EnrichmentRecord::new(
            &Identity {
                email: Some("a@b.com".into()),
                name: Some("Jane Doe".into()),
                ..Identity::default()
            },
            now + Duration::seconds(5),
        );
        rich.apply_provider_state(
            ProviderKind::ContactsProvider,
            ProviderState::fetched(now, serde_json::json!({}), ProfileFields::default()),
        );
        let mut third = EnrichmentRecord::new(&Identity::from_email("a@b.com"), now);
        third.company = Some("Acme".into());

        for r in [&sparse, &rich, &third] {
            store.insert_raw(r.clone()).await;
        }

        let report = reconcile_duplicates(&store, "a@b.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.kept, rich.uuid);
        assert_eq!(report.merged.len(), 2);
        assert_eq!(store.len().await, 1);

        let survivor = store
            .get(&RecordLookup::Email("a@b.com".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(survivor.name.as_deref(), Some("Jane Doe"));
        assert_eq!(survivor.company.as_deref(), Some("Acme"));
        assert_eq!(survivor.created_at, now);
    }

    #[tokio::test]
    async fn single_record_is_left_alone() {
        let store = MemoryRecordStore::new();
        store
            .upsert(&EnrichmentRecord::new(&Identity::from_email("a@b.com"), Utc::now()))
            .await
            .unwrap();
        assert!(reconcile_duplicates(&store, "a@b.com").await.unwrap().is_none());
        assert!(reconcile_all(&store).await.unwrap().is_empty());
    }
}
