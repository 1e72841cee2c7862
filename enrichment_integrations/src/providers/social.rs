//! Social-post scraper, looked up by LinkedIn handle. Contributes posts only.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use enrichment_core::{
    EndpointConfig, FetchIdentity, ProfileFields, ProviderAdapter, ProviderKind, ProviderPayload,
    ProviderResult, Result, SocialPost,
};
use reqwest::Client;

use super::http::{build_client, endpoint_url, send_json, str_field, trim_base};

#[derive(Clone)]
pub struct SocialScraperAdapter {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl SocialScraperAdapter {
    pub fn new(endpoint: &EndpointConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(ProviderKind::SocialScraper, timeout)?,
            api_base: trim_base(&endpoint.base_url),
            token: endpoint.credential.clone(),
        })
    }
}

/// A response without a `posts` array is not found; an empty array is a valid answer.
pub fn parse_posts(body: serde_json::Value) -> ProviderResult {
    let Some(items) = body.get("posts").and_then(|p| p.as_array()) else {
        return ProviderResult::NotFound;
    };
    let posts: Vec<SocialPost> = items.iter().filter_map(post).collect();

    ProviderResult::Success(ProviderPayload {
        raw: body,
        fields: ProfileFields::default(),
        posts,
    })
}

fn post(v: &serde_json::Value) -> Option<SocialPost> {
    let url = str_field(v, &["url", "permalink"]);
    let id = str_field(v, &["id", "urn"]).or_else(|| url.clone())?;
    Some(SocialPost {
        id,
        url,
        text: str_field(v, &["text", "commentary"]).unwrap_or_default(),
        posted_at: str_field(v, &["posted_at", "date"]).and_then(|s| parse_timestamp(&s)),
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl ProviderAdapter for SocialScraperAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::SocialScraper
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch(&self, identity: &FetchIdentity) -> ProviderResult {
        let Some(handle) = identity.linkedin_handle.as_deref() else {
            return ProviderResult::NotFound;
        };
        let url = match endpoint_url(&self.api_base, &["v1", "profiles", handle, "posts"]) {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };
        let mut req = self.client.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        match send_json(self.kind(), req).await {
            Ok(body) => parse_posts(body),
            Err(outcome) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_posts_with_mixed_timestamps() {
        let body = json!({
            "posts": [
                {"urn": "urn:li:activity:1", "url": "https://www.linkedin.com/posts/1", "text": "hello", "posted_at": "2024-04-02T10:00:00Z"},
                {"id": "2", "text": "dated", "date": "2024-03-01"},
                {"text": "no id or url"}
            ]
        });
        let ProviderResult::Success(p) = parse_posts(body) else {
            panic!("expected success");
        };
        assert_eq!(p.posts.len(), 2);
        assert_eq!(p.posts[0].id, "urn:li:activity:1");
        assert!(p.posts[0].posted_at.is_some());
        assert_eq!(
            p.posts[1].posted_at.map(|d| d.to_rfc3339()),
            Some("2024-03-01T00:00:00+00:00".to_string())
        );
        assert_eq!(p.fields, ProfileFields::default());
    }

    #[test]
    fn empty_list_is_success_and_missing_list_is_not_found() {
        assert!(parse_posts(json!({"posts": []})).is_success());
        assert_eq!(parse_posts(json!({"error": "x"})), ProviderResult::NotFound);
    }
}
