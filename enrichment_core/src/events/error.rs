use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid event scope")]
    InvalidScope,

    #[error("invalid event topic")]
    InvalidTopic,

    #[error("invalid event source")]
    InvalidSource,

    #[error("invalid dedupe_key")]
    InvalidDedupeKey,

    #[error("invalid topic pattern")]
    InvalidTopicPattern,

    #[error("invalid consumer group")]
    InvalidConsumerGroup,

    #[error("invalid query filter")]
    InvalidQuery,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("unknown delivery {event_id} for group {group}")]
    UnknownDelivery { group: String, event_id: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("{message}")]
    Message { message: String },

    #[error("backend: {0}")]
    Backend(String),
}

impl Error {
    #[tracing::instrument(level = "debug")]
    pub fn message(message: impl Into<String> + std::fmt::Debug) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    pub fn backend(context: &str, source: impl std::fmt::Display) -> Self {
        Self::Backend(format!("{context}: {source}"))
    }
}
