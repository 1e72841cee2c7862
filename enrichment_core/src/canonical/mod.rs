//! Reconciliation of provider data into the canonical person fields.
//!
//! Each field is resolved independently: caller-supplied values always win,
//! then the graph provider, then the contacts provider. The social scraper
//! contributes posts only. Provider values are re-derived from the provider
//! states stored on the record, so the outcome does not depend on the order in
//! which fetches completed.

pub mod experience;

pub use experience::{Experience, PartialDate, most_recent, sort_by_recency};

use crate::models::{non_blank, normalize_linkedin_handle};
use crate::records::models::{CanonicalField, EnrichmentRecord, FieldSource, ProviderKind};

/// Canonical-field precedence among sources.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    /// Providers allowed to set canonical fields, highest precedence first.
    precedence: Vec<ProviderKind>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self {
            precedence: vec![ProviderKind::GraphProvider, ProviderKind::ContactsProvider],
        }
    }
}

impl Canonicalizer {
    /// Lower is stronger. `None` means the source may not set canonical fields.
    pub fn rank(&self, source: FieldSource) -> Option<usize> {
        match source {
            FieldSource::Caller => Some(0),
            FieldSource::Provider(kind) => self
                .precedence
                .iter()
                .position(|k| *k == kind)
                .map(|i| i + 1),
        }
    }

    /// Resolve every canonical field from the record's provider states.
    /// Returns the fields whose value changed.
    pub fn canonicalize(&self, record: &mut EnrichmentRecord) -> Vec<CanonicalField> {
        let mut changed = Vec::new();
        for field in CanonicalField::ALL {
            if self.resolve_field(record, field) {
                changed.push(field);
            }
        }
        changed
    }

    fn resolve_field(&self, record: &mut EnrichmentRecord, field: CanonicalField) -> bool {
        let current = record.source_of(field);
        if current == Some(FieldSource::Caller) {
            return false;
        }
        if field == CanonicalField::LinkedinHandle && current.is_some() {
            // Fill-only: a known handle is never replaced or cleared.
            return false;
        }

        let Some((kind, value)) = self.best_candidate(record, field) else {
            return false;
        };
        let candidate = FieldSource::Provider(kind);

        let wins = match current.and_then(|s| self.rank(s)) {
            None => true,
            Some(current_rank) => self.rank(candidate).is_some_and(|r| r <= current_rank),
        };
        if !wins || (record.field(field) == Some(value.as_str()) && current == Some(candidate)) {
            return false;
        }
        record.set_field(field, value, candidate);
        true
    }

    fn best_candidate(
        &self,
        record: &EnrichmentRecord,
        field: CanonicalField,
    ) -> Option<(ProviderKind, String)> {
        self.precedence.iter().find_map(|kind| {
            let fields = record.provider(*kind).fields.as_ref()?;
            let raw = fields.get(field)?;
            let value = match field {
                CanonicalField::LinkedinHandle => normalize_linkedin_handle(raw),
                _ => non_blank(Some(raw)),
            }?;
            Some((*kind, value))
        })
    }
}
