use async_trait::async_trait;
use uuid::Uuid;

use super::models::{EnrichmentRecord, RecordLookup};
use crate::Result;

/// Durable home of enrichment records.
///
/// Every failure surfaces as `Error::StoreUnavailable` so the consumer can leave
/// the triggering message unacknowledged.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up a record by uuid, email or LinkedIn handle. When several records
    /// share an email the oldest one is returned.
    async fn get(&self, lookup: &RecordLookup) -> Result<Option<EnrichmentRecord>>;

    /// Insert the record, or merge it into the stored copy with the same uuid.
    ///
    /// The merge never moves a provider state backwards in time. Returns the
    /// record as stored after the write.
    async fn upsert(&self, record: &EnrichmentRecord) -> Result<EnrichmentRecord>;

    async fn exists_handle(&self, handle: &str) -> Result<bool>;

    async fn find_all_by_email(&self, email: &str) -> Result<Vec<EnrichmentRecord>>;

    /// Emails held by more than one record.
    async fn duplicate_emails(&self) -> Result<Vec<String>>;

    /// Returns whether a record was removed.
    async fn delete(&self, uuid: Uuid) -> Result<bool>;
}
