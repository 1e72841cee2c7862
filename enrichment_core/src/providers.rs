//! Contract between the orchestrator and external data providers.
//!
//! Adapters translate one remote API into a `ProviderResult`. They never decide
//! staleness and never write to the record store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::FetchIdentity;
use crate::records::models::{ProfileFields, ProviderKind, SocialPost};
use crate::retry::RetryClass;

/// What a successful fetch produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPayload {
    /// Response body as received, kept for auditing and re-extraction.
    pub raw: serde_json::Value,
    pub fields: ProfileFields,
    #[serde(default)]
    pub posts: Vec<SocialPost>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResult {
    Success(ProviderPayload),
    /// The provider has no data for this identity.
    NotFound,
    RateLimited,
    /// The provider answered with an error that may go away.
    TransientError(String),
    /// The provider could not be reached (connect error, timeout).
    Unreachable(String),
}

impl ProviderResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<ProviderPayload, FetchFailure> {
        match self {
            Self::Success(p) => Ok(p),
            Self::NotFound => Err(FetchFailure::NotFound),
            Self::RateLimited => Err(FetchFailure::RateLimited),
            Self::TransientError(m) => Err(FetchFailure::Transient(m)),
            Self::Unreachable(m) => Err(FetchFailure::Unreachable(m)),
        }
    }
}

/// A non-success `ProviderResult`, as seen by the retry loop.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("transient error: {0}")]
    Transient(String),
    #[error("unreachable: {0}")]
    Unreachable(String),
}

impl FetchFailure {
    pub fn class(&self) -> RetryClass {
        match self {
            Self::NotFound => RetryClass::Permanent,
            Self::RateLimited | Self::Transient(_) => RetryClass::Transient,
            Self::Unreachable(_) => RetryClass::Connection,
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn fetch(&self, identity: &FetchIdentity) -> ProviderResult;
}
