use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Identity, Person, normalize_email, normalize_linkedin_handle};

/// External data sources an entity can be enriched from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Professional-graph profile provider (keyed by LinkedIn handle).
    GraphProvider,
    /// Contacts-enrichment provider (keyed by email, handle optional).
    ContactsProvider,
    /// Social-post scraper (keyed by LinkedIn handle).
    SocialScraper,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::GraphProvider,
        ProviderKind::ContactsProvider,
        ProviderKind::SocialScraper,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GraphProvider => "graph_provider",
            Self::ContactsProvider => "contacts_provider",
            Self::SocialScraper => "social_scraper",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "graph_provider" | "graph" => Some(Self::GraphProvider),
            "contacts_provider" | "contacts" => Some(Self::ContactsProvider),
            "social_scraper" | "social" => Some(Self::SocialScraper),
            _ => None,
        }
    }

    /// Providers that can only be queried once a LinkedIn handle is known.
    pub fn requires_handle(self) -> bool {
        matches!(self, Self::GraphProvider | Self::SocialScraper)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    NotAttempted,
    Fetched,
    TriedButFailed,
}

/// Canonical fields a provider extracted from its payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    pub name: Option<String>,
    pub company: Option<String>,
    pub position: Option<String>,
    pub linkedin_handle: Option<String>,
}

impl ProfileFields {
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        match field {
            CanonicalField::Name => self.name.as_deref(),
            CanonicalField::Company => self.company.as_deref(),
            CanonicalField::Position => self.position.as_deref(),
            CanonicalField::LinkedinHandle => self.linkedin_handle.as_deref(),
        }
    }
}

/// Outcome of the latest fetch attempt against one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderState {
    pub status: ProviderStatus,
    pub last_updated: Option<DateTime<Utc>>,
    pub raw_payload: Option<serde_json::Value>,
    pub fields: Option<ProfileFields>,
    pub last_error: Option<String>,
}

static NOT_ATTEMPTED: ProviderState = ProviderState {
    status: ProviderStatus::NotAttempted,
    last_updated: None,
    raw_payload: None,
    fields: None,
    last_error: None,
};

impl ProviderState {
    pub fn fetched(at: DateTime<Utc>, raw: serde_json::Value, fields: ProfileFields) -> Self {
        Self {
            status: ProviderStatus::Fetched,
            last_updated: Some(at),
            raw_payload: Some(raw),
            fields: Some(fields),
            last_error: None,
        }
    }

    /// A failed attempt keeps the previous payload around; it is only replaced by a newer success.
    pub fn failed(previous: &ProviderState, at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            status: ProviderStatus::TriedButFailed,
            last_updated: Some(at),
            raw_payload: previous.raw_payload.clone(),
            fields: previous.fields.clone(),
            last_error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Name,
    Company,
    Position,
    LinkedinHandle,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 4] = [
        CanonicalField::Name,
        CanonicalField::Company,
        CanonicalField::Position,
        CanonicalField::LinkedinHandle,
    ];
}

/// Who set a canonical field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Caller,
    Provider(ProviderKind),
}

/// Posts kept per record.
pub const MAX_POSTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialPost {
    pub id: String,
    pub url: Option<String>,
    pub text: String,
    pub posted_at: Option<DateTime<Utc>>,
}

impl SocialPost {
    /// Identity used for deduplication: the normalized link when present, else the id.
    pub fn identity_key(&self) -> String {
        match self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => {
                let url = url.split(['?', '#']).next().unwrap_or(url);
                let url = url
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_start_matches("www.")
                    .trim_end_matches('/');
                format!("url:{}", url.to_ascii_lowercase())
            }
            None => format!("id:{}", self.id.trim()),
        }
    }
}

/// Lookup key for the record store. Email and handle are normalized by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLookup {
    Uuid(Uuid),
    Email(String),
    Handle(String),
}

/// Durable per-entity enrichment state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub uuid: Uuid,
    pub email: Option<String>,
    pub linkedin_handle: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub position: Option<String>,
    #[serde(default)]
    pub provenance: BTreeMap<CanonicalField, FieldSource>,
    #[serde(default)]
    pub providers: BTreeMap<ProviderKind, ProviderState>,
    #[serde(default)]
    pub posts: Vec<SocialPost>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentRecord {
    /// First sight of an identity: every provider starts out `NotAttempted`.
    pub fn new(identity: &Identity, now: DateTime<Utc>) -> Self {
        let identity = identity.normalized();
        let mut record = Self {
            uuid: identity.uuid.unwrap_or_else(Uuid::new_v4),
            email: identity.email.clone(),
            linkedin_handle: None,
            name: None,
            company: None,
            position: None,
            provenance: BTreeMap::new(),
            providers: ProviderKind::ALL
                .iter()
                .map(|k| (*k, ProviderState::default()))
                .collect(),
            posts: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        record.attach_identity(&identity, now);
        record
    }

    pub fn provider(&self, kind: ProviderKind) -> &ProviderState {
        self.providers.get(&kind).unwrap_or(&NOT_ATTEMPTED)
    }

    pub fn field(&self, field: CanonicalField) -> Option<&str> {
        match field {
            CanonicalField::Name => self.name.as_deref(),
            CanonicalField::Company => self.company.as_deref(),
            CanonicalField::Position => self.position.as_deref(),
            CanonicalField::LinkedinHandle => self.linkedin_handle.as_deref(),
        }
    }

    pub(crate) fn set_field(&mut self, field: CanonicalField, value: String, source: FieldSource) {
        let slot = match field {
            CanonicalField::Name => &mut self.name,
            CanonicalField::Company => &mut self.company,
            CanonicalField::Position => &mut self.position,
            CanonicalField::LinkedinHandle => &mut self.linkedin_handle,
        };
        *slot = Some(value);
        self.provenance.insert(field, source);
    }

    /// Source of a non-blank canonical field. Values with no recorded provenance
    /// count as caller-supplied.
    pub fn source_of(&self, field: CanonicalField) -> Option<FieldSource> {
        let value = self.field(field)?;
        if value.trim().is_empty() {
            return None;
        }
        Some(
            self.provenance
                .get(&field)
                .copied()
                .unwrap_or(FieldSource::Caller),
        )
    }

    /// Fold caller-supplied identity data into the record. Returns whether anything changed.
    pub fn attach_identity(&mut self, identity: &Identity, now: DateTime<Utc>) -> bool {
        let identity = identity.normalized();
        let mut changed = false;

        if self.email.is_none() {
            if let Some(email) = identity.email {
                self.email = Some(email);
                changed = true;
            }
        }

        let caller = [
            (CanonicalField::LinkedinHandle, identity.linkedin_handle),
            (CanonicalField::Name, identity.name),
            (CanonicalField::Company, identity.company),
            (CanonicalField::Position, identity.position),
        ];
        for (field, value) in caller {
            let Some(value) = value else { continue };
            if field == CanonicalField::LinkedinHandle && self.linkedin_handle.is_some() {
                // A known handle is the record's address; a different one is a different person.
                continue;
            }
            if self.field(field) == Some(value.as_str())
                && self.source_of(field) == Some(FieldSource::Caller)
            {
                continue;
            }
            self.set_field(field, value, FieldSource::Caller);
            changed = true;
        }

        if changed {
            self.touch(now);
        }
        changed
    }

    /// Replace a provider's state only if the incoming attempt is not older than
    /// what is stored. Returns whether the state was applied.
    pub fn apply_provider_state(&mut self, kind: ProviderKind, incoming: ProviderState) -> bool {
        let stored = self.provider(kind);
        let newer = match (stored.last_updated, incoming.last_updated) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(s), Some(i)) => i >= s,
        };
        if !newer {
            return false;
        }
        self.providers.insert(kind, incoming);
        true
    }

    /// Union posts by identity key; newest first, undated last. Only the newest
    /// `MAX_POSTS` are kept. Returns how many incoming posts were new.
    pub fn merge_posts(&mut self, incoming: &[SocialPost]) -> usize {
        let mut seen: HashSet<String> = self.posts.iter().map(SocialPost::identity_key).collect();
        let mut added = 0usize;
        for post in incoming {
            if seen.insert(post.identity_key()) {
                self.posts.push(post.clone());
                added += 1;
            }
        }
        // Stable: equal timestamps keep their arrival order.
        self.posts.sort_by(|a, b| match (a.posted_at, b.posted_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        self.posts.truncate(MAX_POSTS);
        added
    }

    /// Store-side read-modify-write merge of a concurrently written record.
    ///
    /// Canonical fields are last-writer-wins (a missing incoming value never clears a
    /// stored one); provider states only move forward in time; posts are unioned.
    pub fn merge_from(&mut self, incoming: &EnrichmentRecord) {
        if incoming.email.is_some() {
            self.email = incoming.email.clone();
        }
        for field in CanonicalField::ALL {
            if let Some(value) = incoming.field(field).filter(|v| !v.trim().is_empty()) {
                let source = incoming.source_of(field).unwrap_or(FieldSource::Caller);
                self.set_field(field, value.to_string(), source);
            }
        }
        for (kind, state) in &incoming.providers {
            self.apply_provider_state(*kind, state.clone());
        }
        self.merge_posts(&incoming.posts);
        self.created_at = self.created_at.min(incoming.created_at);
        self.updated_at = self.updated_at.max(incoming.updated_at);
    }

    /// Merge a duplicate into this record, keeping every value this record already has.
    pub fn absorb(&mut self, other: &EnrichmentRecord) {
        if self.email.is_none() {
            self.email = other.email.clone();
        }
        for field in CanonicalField::ALL {
            if self.source_of(field).is_some() {
                continue;
            }
            if let Some(value) = other.field(field).filter(|v| !v.trim().is_empty()) {
                let source = other.source_of(field).unwrap_or(FieldSource::Caller);
                self.set_field(field, value.to_string(), source);
            }
        }
        for (kind, state) in &other.providers {
            self.apply_provider_state(*kind, state.clone());
        }
        self.merge_posts(&other.posts);
        self.created_at = self.created_at.min(other.created_at);
        self.updated_at = self.updated_at.max(other.updated_at);
    }

    /// How much useful data the record holds; used to pick the survivor among duplicates.
    pub fn completeness(&self) -> usize {
        let fields = CanonicalField::ALL
            .iter()
            .filter(|f| self.source_of(**f).is_some())
            .count();
        let fetched = self
            .providers
            .values()
            .filter(|p| p.status == ProviderStatus::Fetched)
            .count();
        fields * 2 + fetched * 3 + self.posts.len().min(10)
    }

    pub fn person(&self) -> Person {
        Person {
            uuid: self.uuid,
            name: self.name.clone(),
            company: self.company.clone(),
            position: self.position.clone(),
            linkedin_handle: self.linkedin_handle.clone(),
            email: self.email.clone(),
        }
    }

    /// Identity the orchestrator hands to adapters and failure events.
    pub fn identity(&self) -> Identity {
        Identity {
            uuid: Some(self.uuid),
            email: self.email.clone(),
            linkedin_handle: self.linkedin_handle.clone(),
            ..Identity::default()
        }
    }

    /// Normalize address fields in place (handles read from older rows, imports, etc.).
    pub fn normalize(&mut self) {
        self.email = self.email.as_deref().and_then(normalize_email);
        self.linkedin_handle = self
            .linkedin_handle
            .as_deref()
            .and_then(normalize_linkedin_handle);
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn new_record_starts_with_every_provider_not_attempted() {
        let rec = EnrichmentRecord::new(&Identity::from_email("A@B.com"), t(1));
        assert_eq!(rec.email.as_deref(), Some("a@b.com"));
        for kind in ProviderKind::ALL {
            assert_eq!(rec.provider(kind).status, ProviderStatus::NotAttempted);
        }
    }

    #[test]
    fn caller_fields_are_recorded_with_caller_provenance() {
        let id = Identity {
            email: Some("a@b.com".into()),
            company: Some("Acme".into()),
            linkedin_handle: Some("https://linkedin.com/in/Jane/".into()),
            ..Identity::default()
        };
        let rec = EnrichmentRecord::new(&id, t(1));
        assert_eq!(rec.company.as_deref(), Some("Acme"));
        assert_eq!(rec.linkedin_handle.as_deref(), Some("jane"));
        assert_eq!(
            rec.source_of(CanonicalField::Company),
            Some(FieldSource::Caller)
        );
        assert_eq!(rec.source_of(CanonicalField::Name), None);
    }

    #[test]
    fn stale_provider_write_does_not_regress_fresher_state() {
        let mut rec = EnrichmentRecord::new(&Identity::from_email("a@b.com"), t(1));
        let fresh = ProviderState::fetched(t(10), serde_json::json!({"v": 2}), ProfileFields::default());
        let stale = ProviderState::fetched(t(5), serde_json::json!({"v": 1}), ProfileFields::default());

        assert!(rec.apply_provider_state(ProviderKind::GraphProvider, fresh.clone()));
        assert!(!rec.apply_provider_state(ProviderKind::GraphProvider, stale));
        assert_eq!(rec.provider(ProviderKind::GraphProvider), &fresh);

        // Equal timestamps are accepted (idempotent redelivery).
        let again = ProviderState::failed(&fresh, t(10), "404");
        assert!(rec.apply_provider_state(ProviderKind::GraphProvider, again));
        assert_eq!(
            rec.provider(ProviderKind::GraphProvider).raw_payload,
            Some(serde_json::json!({"v": 2}))
        );
    }

    #[test]
    fn stored_posts_are_capped_to_the_newest() {
        let mut rec = EnrichmentRecord::new(&Identity::from_handle("jane"), t(1));
        let batch = |from: usize| -> Vec<SocialPost> {
            (from..from + MAX_POSTS)
                .map(|i| SocialPost {
                    id: format!("p{i}"),
                    url: None,
                    text: String::new(),
                    posted_at: Some(t(1) + chrono::Duration::minutes(i as i64)),
                })
                .collect()
        };
        rec.merge_posts(&batch(0));
        assert_eq!(rec.posts.len(), MAX_POSTS);

        let added = rec.merge_posts(&batch(MAX_POSTS / 2));
        assert_eq!(added, MAX_POSTS / 2);
        assert_eq!(rec.posts.len(), MAX_POSTS);
        assert_eq!(rec.posts[0].id, format!("p{}", MAX_POSTS / 2 + MAX_POSTS - 1));
        assert_eq!(rec.posts[MAX_POSTS - 1].id, format!("p{}", MAX_POSTS / 2));
    }

    #[test]
    fn merge_from_unions_posts_and_keeps_fresher_providers() {
        let mut stored = EnrichmentRecord::new(&Identity::from_email("a@b.com"), t(1));
        stored.apply_provider_state(
            ProviderKind::ContactsProvider,
            ProviderState::fetched(t(9), serde_json::json!({}), ProfileFields::default()),
        );
        stored.merge_posts(&[SocialPost {
            id: "1".into(),
            url: Some("https://www.linkedin.com/posts/1/".into()),
            text: "hello".into(),
            posted_at: Some(t(2)),
        }]);

        let mut incoming = stored.clone();
        incoming.providers.insert(
            ProviderKind::ContactsProvider,
            ProviderState::failed(&ProviderState::default(), t(3), "timeout"),
        );
        incoming.posts = vec![
            SocialPost {
                id: "dup".into(),
                url: Some("http://linkedin.com/posts/1?utm=x".into()),
                text: "hello".into(),
                posted_at: Some(t(2)),
            },
            SocialPost {
                id: "2".into(),
                url: None,
                text: "newer".into(),
                posted_at: Some(t(4)),
            },
        ];
        incoming.company = Some("Acme".into());
        incoming.updated_at = t(4);

        stored.merge_from(&incoming);
        assert_eq!(
            stored.provider(ProviderKind::ContactsProvider).status,
            ProviderStatus::Fetched
        );
        assert_eq!(stored.posts.len(), 2);
        assert_eq!(stored.posts[0].id, "2");
        assert_eq!(stored.company.as_deref(), Some("Acme"));
        assert_eq!(stored.updated_at, t(4));
    }

    #[test]
    fn absorb_keeps_survivor_values() {
        let mut keeper = EnrichmentRecord::new(
            &Identity {
                email: Some("a@b.com".into()),
                name: Some("Jane".into()),
                ..Identity::default()
            },
            t(2),
        );
        let other = EnrichmentRecord::new(
            &Identity {
                email: Some("a@b.com".into()),
                name: Some("J. Doe".into()),
                company: Some("Acme".into()),
                ..Identity::default()
            },
            t(1),
        );
        keeper.absorb(&other);
        assert_eq!(keeper.name.as_deref(), Some("Jane"));
        assert_eq!(keeper.company.as_deref(), Some("Acme"));
        assert_eq!(keeper.created_at, t(1));
        assert!(keeper.completeness() >= other.completeness());
    }
}
