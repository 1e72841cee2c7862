//! Enrichment records: per-entity canonical fields, provider states and posts.

pub mod maintenance;
pub mod memory;
pub mod models;
pub mod sqlite;
pub mod traits;

pub use maintenance::{ReconcileReport, reconcile_all, reconcile_duplicates};
pub use memory::MemoryRecordStore;
pub use models::{
    CanonicalField, EnrichmentRecord, FieldSource, ProfileFields, ProviderKind, ProviderState,
    ProviderStatus, RecordLookup, SocialPost,
};
pub use sqlite::SqliteRecordStore;
pub use traits::RecordStore;
