//! When a provider should be queried again.

use chrono::{DateTime, Duration, Utc};

use crate::records::models::{EnrichmentRecord, ProviderKind, ProviderStatus};

/// Plain TTL test for one provider state.
///
/// `ttl` is the window that applies to `status` (fetched TTL for `Fetched`,
/// failure TTL for `TriedButFailed`).
pub fn is_due(
    status: ProviderStatus,
    last_updated: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> bool {
    match (status, last_updated) {
        (ProviderStatus::NotAttempted, _) => true,
        (_, None) => true,
        (_, Some(at)) => now.signed_duration_since(at) >= ttl,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    /// Refresh window for profile providers (graph, contacts).
    pub profile_ttl: Duration,
    /// Refresh window for the social scraper.
    pub posts_ttl: Duration,
    /// How long a failed attempt suppresses retries.
    pub failed_ttl: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            profile_ttl: Duration::days(30),
            posts_ttl: Duration::days(14),
            failed_ttl: Duration::days(7),
        }
    }
}

impl StalenessPolicy {
    pub fn fetched_ttl(&self, kind: ProviderKind) -> Duration {
        match kind {
            ProviderKind::SocialScraper => self.posts_ttl,
            ProviderKind::GraphProvider | ProviderKind::ContactsProvider => self.profile_ttl,
        }
    }

    /// Whether `kind` should be fetched for `record` at `now`.
    ///
    /// Handle-keyed providers are never due without a handle. A failed provider
    /// becomes due early once a sibling has fetched data more recently than the
    /// failure, since that data may carry a better lookup key.
    pub fn provider_due(
        &self,
        record: &EnrichmentRecord,
        kind: ProviderKind,
        now: DateTime<Utc>,
    ) -> bool {
        let has_handle = record.linkedin_handle.is_some();
        if kind.requires_handle() && !has_handle {
            return false;
        }
        if kind == ProviderKind::ContactsProvider && record.email.is_none() && !has_handle {
            return false;
        }

        let state = record.provider(kind);
        let ttl = match state.status {
            ProviderStatus::TriedButFailed => self.failed_ttl,
            _ => self.fetched_ttl(kind),
        };
        if is_due(state.status, state.last_updated, now, ttl) {
            return true;
        }

        if state.status == ProviderStatus::TriedButFailed {
            let Some(failed_at) = state.last_updated else {
                return true;
            };
            return ProviderKind::ALL
                .iter()
                .filter(|k| **k != kind)
                .map(|k| record.provider(*k))
                .any(|s| {
                    s.status == ProviderStatus::Fetched
                        && s.last_updated.is_some_and(|at| at > failed_at)
                });
        }
        false
    }

    /// Providers from `priority` that are due right now, in order.
    pub fn due_providers(
        &self,
        record: &EnrichmentRecord,
        priority: &[ProviderKind],
        now: DateTime<Utc>,
    ) -> Vec<ProviderKind> {
        priority
            .iter()
            .copied()
            .filter(|k| self.provider_due(record, *k, now))
            .collect()
    }

    /// A provider holding data that is still inside its refresh window.
    pub fn has_fresh_data(&self, record: &EnrichmentRecord, now: DateTime<Utc>) -> bool {
        ProviderKind::ALL.iter().any(|k| {
            let s = record.provider(*k);
            s.status == ProviderStatus::Fetched
                && !is_due(s.status, s.last_updated, now, self.fetched_ttl(*k))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use crate::records::models::{ProfileFields, ProviderState};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn ttl_boundaries() {
        let ttl = Duration::days(30);
        assert!(is_due(ProviderStatus::NotAttempted, None, t0(), ttl));
        assert!(is_due(ProviderStatus::Fetched, None, t0(), ttl));
        assert!(!is_due(ProviderStatus::Fetched, Some(t0()), t0(), ttl));
        assert!(!is_due(
            ProviderStatus::Fetched,
            Some(t0()),
            t0() + ttl - Duration::seconds(1),
            ttl
        ));
        assert!(is_due(ProviderStatus::Fetched, Some(t0()), t0() + ttl, ttl));
    }

    #[test]
    fn handle_keyed_providers_wait_for_a_handle() {
        let policy = StalenessPolicy::default();
        let rec = EnrichmentRecord::new(&Identity::from_email("a@b.com"), t0());
        let order = [
            ProviderKind::ContactsProvider,
            ProviderKind::GraphProvider,
            ProviderKind::SocialScraper,
        ];
        assert_eq!(
            policy.due_providers(&rec, &order, t0()),
            vec![ProviderKind::ContactsProvider]
        );

        let with_handle = EnrichmentRecord::new(&Identity::from_handle("jane"), t0());
        assert_eq!(policy.due_providers(&with_handle, &order, t0()), order.to_vec());
    }

    #[test]
    fn failure_is_suppressed_until_ttl_or_newer_sibling_data() {
        let policy = StalenessPolicy::default();
        let mut rec = EnrichmentRecord::new(&Identity::from_handle("jane"), t0());
        rec.apply_provider_state(
            ProviderKind::GraphProvider,
            ProviderState::failed(&ProviderState::default(), t0(), "404"),
        );
        let later = t0() + Duration::days(1);
        assert!(!policy.provider_due(&rec, ProviderKind::GraphProvider, later));
        assert!(policy.provider_due(
            &rec,
            ProviderKind::GraphProvider,
            t0() + policy.failed_ttl
        ));

        // Same-instant sibling writes do not escalate.
        rec.apply_provider_state(
            ProviderKind::ContactsProvider,
            ProviderState::fetched(t0(), serde_json::json!({}), ProfileFields::default()),
        );
        assert!(!policy.provider_due(&rec, ProviderKind::GraphProvider, later));

        rec.apply_provider_state(
            ProviderKind::ContactsProvider,
            ProviderState::fetched(later, serde_json::json!({}), ProfileFields::default()),
        );
        assert!(policy.provider_due(&rec, ProviderKind::GraphProvider, later));
    }

    #[test]
    fn fresh_data_tracks_fetched_ttl() {
        let policy = StalenessPolicy::default();
        let mut rec = EnrichmentRecord::new(&Identity::from_email("a@b.com"), t0());
        assert!(!policy.has_fresh_data(&rec, t0()));
        rec.apply_provider_state(
            ProviderKind::ContactsProvider,
            ProviderState::fetched(t0(), serde_json::json!({}), ProfileFields::default()),
        );
        assert!(policy.has_fresh_data(&rec, t0() + Duration::days(29)));
        assert!(!policy.has_fresh_data(&rec, t0() + Duration::days(30)));
    }
}
