//! Professional-graph profile provider, looked up by LinkedIn handle.

use std::time::Duration;

use async_trait::async_trait;
use enrichment_core::canonical::{Experience, most_recent};
use enrichment_core::{
    EndpointConfig, FetchIdentity, ProfileFields, ProviderAdapter, ProviderKind, ProviderPayload,
    ProviderResult, Result,
};
use reqwest::Client;

use super::http::{build_client, endpoint_url, full_name, send_json, str_field, trim_base};

#[derive(Clone)]
pub struct GraphProviderAdapter {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl GraphProviderAdapter {
    pub fn new(endpoint: &EndpointConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(ProviderKind::GraphProvider, timeout)?,
            api_base: trim_base(&endpoint.base_url),
            token: endpoint.credential.clone(),
        })
    }
}

/// Turn a profile response into an adapter outcome.
///
/// Accepts the profile at the top level or under `profile`. A profile with
/// neither a name nor any experience is treated as not found.
pub fn parse_profile(body: serde_json::Value) -> ProviderResult {
    let profile = body.get("profile").cloned().unwrap_or_else(|| body.clone());
    if !profile.is_object() {
        return ProviderResult::NotFound;
    }

    let experiences: Vec<Experience> = profile
        .get("experiences")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().map(experience).collect())
        .unwrap_or_default();
    let current = most_recent(&experiences);

    let fields = ProfileFields {
        name: full_name(&profile, &["full_name", "fullName", "name"]),
        company: current
            .and_then(|e| e.company.clone())
            .or_else(|| str_field(&profile, &["company"])),
        position: current
            .and_then(|e| e.title.clone())
            .or_else(|| str_field(&profile, &["occupation", "headline"])),
        linkedin_handle: str_field(&profile, &["public_identifier", "publicIdentifier"]),
    };
    if fields.name.is_none() && experiences.is_empty() {
        return ProviderResult::NotFound;
    }

    ProviderResult::Success(ProviderPayload {
        raw: body,
        fields,
        posts: Vec::new(),
    })
}

fn experience(v: &serde_json::Value) -> Experience {
    Experience {
        company: str_field(v, &["company", "company_name"]),
        title: str_field(v, &["title"]),
        start_date: str_field(v, &["starts_at", "start_date"]),
        end_date: str_field(v, &["ends_at", "end_date"]),
    }
}

#[async_trait]
impl ProviderAdapter for GraphProviderAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GraphProvider
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch(&self, identity: &FetchIdentity) -> ProviderResult {
        let Some(handle) = identity.linkedin_handle.as_deref() else {
            return ProviderResult::NotFound;
        };
        let url = match endpoint_url(&self.api_base, &["v1", "profiles", handle]) {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };
        let mut req = self.client.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        match send_json(self.kind(), req).await {
            Ok(body) => parse_profile(body),
            Err(outcome) => outcome,
        }
    }
}
