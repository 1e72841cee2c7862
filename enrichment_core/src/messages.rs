//! Typed payloads for the enrichment topics.
//!
//! Inbound events are parsed once at the bus boundary; everything past that
//! point works with `InboundEvent`.

use serde::{Deserialize, Serialize};

use crate::events::models::Event;
use crate::models::{Identity, Person};
use crate::records::models::ProviderKind;
use crate::{Error, Result};

pub mod topics {
    pub const NEW_ENTITY: &str = "enrichment.new_entity";
    pub const NEW_EMAIL: &str = "enrichment.new_email";
    pub const UPDATED: &str = "enrichment.updated";
    pub const UP_TO_DATE: &str = "enrichment.up_to_date";
    pub const FAILED: &str = "enrichment.failed";

    /// Topics the orchestrator consumes.
    pub const INBOUND: [&str; 2] = [NEW_ENTITY, NEW_EMAIL];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    NewEntity { identity: Identity },
    NewEmail { email: String },
}

#[derive(Deserialize)]
struct NewEntityPayload {
    identity: Identity,
}

#[derive(Deserialize)]
struct NewEmailPayload {
    email: String,
}

impl InboundEvent {
    pub fn parse(event: &Event) -> Result<Self> {
        Self::from_parts(&event.topic, &event.payload)
    }

    pub fn from_parts(topic: &str, payload: &serde_json::Value) -> Result<Self> {
        let parsed = match topic {
            topics::NEW_ENTITY => {
                let p: NewEntityPayload = serde_json::from_value(payload.clone())
                    .map_err(|e| Error::InvalidInput(format!("{topic}: {e}")))?;
                Self::NewEntity {
                    identity: p.identity,
                }
            }
            topics::NEW_EMAIL => {
                let p: NewEmailPayload = serde_json::from_value(payload.clone())
                    .map_err(|e| Error::InvalidInput(format!("{topic}: {e}")))?;
                Self::NewEmail { email: p.email }
            }
            other => return Err(Error::InvalidInput(format!("unknown topic {other}"))),
        };
        if parsed.identity().is_empty() {
            return Err(Error::InvalidInput(format!(
                "{topic}: identity has no uuid, email or handle"
            )));
        }
        Ok(parsed)
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::NewEntity { .. } => topics::NEW_ENTITY,
            Self::NewEmail { .. } => topics::NEW_EMAIL,
        }
    }

    /// Normalized identity carried by the event.
    pub fn identity(&self) -> Identity {
        match self {
            Self::NewEntity { identity } => identity.normalized(),
            Self::NewEmail { email } => Identity::from_email(email.as_str()).normalized(),
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::NewEntity { identity } => serde_json::json!({ "identity": identity }),
            Self::NewEmail { email } => serde_json::json!({ "email": email }),
        }
    }

    /// Dedupe key for publishing this request: `topic:identity-key:ulid`.
    ///
    /// Unique per call, so asking again for the same person is always delivered;
    /// the staleness check keeps such repeats free of provider calls. Retries of
    /// one publish must reuse the key they were first given.
    pub fn dedupe_key(&self) -> String {
        let id = self.identity();
        let key = id
            .uuid
            .map(|u| u.to_string())
            .or(id.linkedin_handle)
            .or(id.email)
            .unwrap_or_default();
        format!("{}:{}:{}", self.topic(), key, ulid::Ulid::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundEvent {
    Updated {
        person: Person,
    },
    UpToDate {
        person: Person,
    },
    Failed {
        identity: Identity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<ProviderKind>,
        reason: String,
    },
}

impl OutboundEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Updated { .. } => topics::UPDATED,
            Self::UpToDate { .. } => topics::UP_TO_DATE,
            Self::Failed { .. } => topics::FAILED,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Updated { person } | Self::UpToDate { person } => {
                serde_json::json!({ "person": person })
            }
            Self::Failed {
                identity,
                provider,
                reason,
            } => serde_json::json!({
                "identity": identity,
                "provider": provider,
                "reason": reason,
            }),
        }
    }

    /// Derived from the triggering event so a redelivered message republishes nothing new.
    pub fn dedupe_key(&self, cause_event_id: &str) -> String {
        match self {
            Self::Failed {
                provider: Some(p), ..
            } => format!("{cause_event_id}:{}:{p}", self.topic()),
            _ => format!("{cause_event_id}:{}", self.topic()),
        }
    }

    pub fn into_event(self, scope: &str, source: &str, cause: &Event) -> Result<Event> {
        let metadata = serde_json::json!({ "cause_event_id": cause.id });
        Event::new(
            scope,
            self.topic(),
            source,
            self.payload(),
            self.dedupe_key(&cause.id),
            metadata,
            None,
        )
        .map_err(Error::from)
    }
}
