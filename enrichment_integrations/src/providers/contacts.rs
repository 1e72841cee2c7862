//! Contacts-enrichment provider: matches a person by email (and LinkedIn URL when known).

use std::time::Duration;

use async_trait::async_trait;
use enrichment_core::canonical::{Experience, most_recent};
use enrichment_core::{
    EndpointConfig, FetchIdentity, ProfileFields, ProviderAdapter, ProviderKind, ProviderPayload,
    ProviderResult, Result,
};
use reqwest::Client;

use super::http::{build_client, full_name, send_json, str_field, trim_base};

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Clone)]
pub struct ContactsProviderAdapter {
    client: Client,
    api_base: String,
    api_key: Option<String>,
}

impl ContactsProviderAdapter {
    pub fn new(endpoint: &EndpointConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(ProviderKind::ContactsProvider, timeout)?,
            api_base: trim_base(&endpoint.base_url),
            api_key: endpoint.credential.clone(),
        })
    }
}

pub fn parse_match(body: serde_json::Value) -> ProviderResult {
    let Some(person) = body.get("person").filter(|p| p.is_object()) else {
        return ProviderResult::NotFound;
    };

    let history: Vec<Experience> = person
        .get("employment_history")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().map(employment).collect())
        .unwrap_or_default();
    let current = most_recent(&history);

    let fields = ProfileFields {
        name: full_name(person, &["name"]),
        company: current.and_then(|e| e.company.clone()).or_else(|| {
            person
                .get("organization")
                .and_then(|o| str_field(o, &["name"]))
        }),
        position: current
            .and_then(|e| e.title.clone())
            .or_else(|| str_field(person, &["title"])),
        linkedin_handle: str_field(person, &["linkedin_url"]),
    };
    if fields == ProfileFields::default() {
        return ProviderResult::NotFound;
    }

    ProviderResult::Success(ProviderPayload {
        raw: body,
        fields,
        posts: Vec::new(),
    })
}

fn employment(v: &serde_json::Value) -> Experience {
    let current = v.get("current").and_then(|c| c.as_bool()).unwrap_or(false);
    Experience {
        company: str_field(v, &["organization_name", "company"]),
        title: str_field(v, &["title"]),
        start_date: str_field(v, &["start_date"]),
        end_date: if current {
            None
        } else {
            str_field(v, &["end_date"])
        },
    }
}

#[async_trait]
impl ProviderAdapter for ContactsProviderAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ContactsProvider
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch(&self, identity: &FetchIdentity) -> ProviderResult {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(email) = &identity.email {
            query.push(("email", email.clone()));
        }
        if let Some(handle) = &identity.linkedin_handle {
            query.push(("linkedin_url", format!("https://www.linkedin.com/in/{handle}")));
        }
        if query.is_empty() {
            return ProviderResult::NotFound;
        }

        let mut req = self
            .client
            .get(format!("{}/v1/people/match", self.api_base))
            .query(&query);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        match send_json(self.kind(), req).await {
            Ok(body) => parse_match(body),
            Err(outcome) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_employment_wins_over_organization() {
        let body = json!({
            "person": {
                "name": "Jane Doe",
                "title": "Stale Title",
                "linkedin_url": "http://www.linkedin.com/in/janedoe",
                "organization": {"name": "Stale Org"},
                "employment_history": [
                    {"organization_name": "Before", "title": "Eng", "start_date": "2015-01-01", "end_date": "2018-12-31"},
                    {"organization_name": "Acme", "title": "VP", "start_date": "2019-01-01", "end_date": "2019-01-01", "current": true}
                ]
            }
        });
        let ProviderResult::Success(p) = parse_match(body) else {
            panic!("expected success");
        };
        assert_eq!(p.fields.company.as_deref(), Some("Acme"));
        assert_eq!(p.fields.position.as_deref(), Some("VP"));
        assert_eq!(
            p.fields.linkedin_handle.as_deref(),
            Some("http://www.linkedin.com/in/janedoe")
        );
    }

    #[test]
    fn missing_or_empty_person_is_not_found() {
        assert_eq!(parse_match(json!({"person": null})), ProviderResult::NotFound);
        assert_eq!(parse_match(json!({})), ProviderResult::NotFound);
        assert_eq!(parse_match(json!({"person": {"name": " "}})), ProviderResult::NotFound);
    }

    #[test]
    fn falls_back_to_organization_without_history() {
        let ProviderResult::Success(p) = parse_match(json!({
            "person": {"first_name": "Jane", "organization": {"name": "Acme"}, "title": "CEO"}
        })) else {
            panic!("expected success");
        };
        assert_eq!(p.fields.name.as_deref(), Some("Jane"));
        assert_eq!(p.fields.company.as_deref(), Some("Acme"));
        assert_eq!(p.fields.position.as_deref(), Some("CEO"));
    }
}
