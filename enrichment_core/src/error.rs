use std::error::Error as StdError;

use crate::records::models::ProviderKind;

/// Common error type for `enrichment_core`.
///
/// Store implementations should preserve the underlying error chain where
/// possible via `Error::store` / `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("provider {provider} has no data: {message}")]
    ProviderNotFound {
        provider: ProviderKind,
        message: String,
    },

    #[error("provider {provider} failed after {attempts} attempts: {message}")]
    ProviderTransient {
        provider: ProviderKind,
        attempts: u32,
        message: String,
    },

    #[error("record store unavailable: {context}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("event bus: {0}")]
    Bus(#[from] crate::events::Error),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },
}

impl Error {
    #[tracing::instrument(level = "debug", name = "enrichment.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a record-store failure. These are the only errors that hold back a checkpoint.
    pub fn store(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::StoreUnavailable {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether the message that produced this error should be redelivered.
    ///
    /// Store and bus outages leave the delivery unacknowledged; everything else
    /// is recorded as an outcome and checkpointed.
    pub fn is_redeliverable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::Bus(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
