//! Enrichment core library: event bus, record store, provider contract and the
//! orchestration pipeline that keeps person records fresh.

pub mod canonical;
pub mod config;
pub mod error;
pub mod events;
pub mod messages;
pub mod models;
pub mod o11y;
pub mod orchestrator;
pub mod providers;
pub mod records;
pub mod retry;
pub mod staleness;

pub use canonical::{Canonicalizer, Experience, PartialDate};
pub use config::{EndpointConfig, EnrichmentConfig, ProviderEndpoints};
pub use error::{Error, Result};
pub use messages::{InboundEvent, OutboundEvent, topics};
pub use models::{FetchIdentity, Identity, Person, normalize_email, normalize_linkedin_handle};
pub use orchestrator::{
    BatchStats, ConsumerConfig, ConsumerRunner, EnrichmentOrchestrator, EventHandler,
    OrchestratorConfig, PassOutcome,
};
pub use providers::{FetchFailure, ProviderAdapter, ProviderPayload, ProviderResult};
pub use records::{
    EnrichmentRecord, MemoryRecordStore, ProfileFields, ProviderKind, ProviderState,
    ProviderStatus, RecordLookup, RecordStore, SocialPost, SqliteRecordStore,
};
pub use retry::{RetryClass, RetryFailure, RetryPolicy, retry_with_backoff};
pub use staleness::{StalenessPolicy, is_due};
