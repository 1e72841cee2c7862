//! Shared HTTP plumbing: client construction and response classification.

use std::time::Duration;

use enrichment_core::{Error, ProviderKind, ProviderResult, Result};
use reqwest::{Client, RequestBuilder, StatusCode, Url};

const BODY_SNIPPET: usize = 200;

pub(crate) fn build_client(kind: ProviderKind, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("enrichment-worker/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::backend(format!("{kind} http client"), e))
}

pub(crate) fn trim_base(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}

/// `base` with `segments` appended, each percent-encoded as one path segment.
pub(crate) fn endpoint_url(base: &str, segments: &[&str]) -> std::result::Result<Url, ProviderResult> {
    let invalid = || ProviderResult::TransientError(format!("invalid provider base url: {base}"));
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map a non-2xx status to the adapter outcome. `None` means the body should be parsed.
pub fn classify_status(kind: ProviderKind, status: StatusCode, body: &str) -> Option<ProviderResult> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::NOT_FOUND => ProviderResult::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ProviderResult::RateLimited,
        s if s.is_server_error() => ProviderResult::TransientError(format!("http {}", s.as_u16())),
        s => {
            let snippet: String = body.chars().take(BODY_SNIPPET).collect();
            tracing::warn!(provider = %kind, status = s.as_u16(), body = %snippet, "unexpected provider response");
            ProviderResult::TransientError(format!("http {}: {snippet}", s.as_u16()))
        }
    })
}

/// Send `req` and return the JSON body, or the outcome that ends this attempt.
pub(crate) async fn send_json(
    kind: ProviderKind,
    req: RequestBuilder,
) -> std::result::Result<serde_json::Value, ProviderResult> {
    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() || e.is_connect() {
            ProviderResult::Unreachable(e.to_string())
        } else {
            ProviderResult::TransientError(e.to_string())
        }
    })?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| ProviderResult::Unreachable(format!("reading body: {e}")))?;
    if let Some(outcome) = classify_status(kind, status, &text) {
        return Err(outcome);
    }
    serde_json::from_str(&text)
        .map_err(|e| ProviderResult::TransientError(format!("invalid json from {kind}: {e}")))
}

/// First non-blank string among `keys` on `obj`.
pub(crate) fn str_field(obj: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        obj.get(*k)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// `first last` when no full name is given.
pub(crate) fn full_name(obj: &serde_json::Value, full_keys: &[&str]) -> Option<String> {
    str_field(obj, full_keys).or_else(|| {
        let parts: Vec<String> = [
            str_field(obj, &["first_name", "firstName"]),
            str_field(obj, &["last_name", "lastName"]),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    })
}
