use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a person as supplied by an inbound event.
///
/// At least one of `uuid`, `email` or `linkedin_handle` must be present. The
/// optional `name`/`company`/`position` are caller-supplied and take precedence
/// over anything a provider returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl Identity {
    pub fn from_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    pub fn from_handle(handle: impl Into<String>) -> Self {
        Self {
            linkedin_handle: Some(handle.into()),
            ..Self::default()
        }
    }

    /// Trim every field, drop blanks, lowercase the email and shorten the handle.
    pub fn normalized(&self) -> Self {
        Self {
            uuid: self.uuid,
            email: self.email.as_deref().and_then(normalize_email),
            linkedin_handle: self
                .linkedin_handle
                .as_deref()
                .and_then(normalize_linkedin_handle),
            name: non_blank(self.name.as_deref()),
            company: non_blank(self.company.as_deref()),
            position: non_blank(self.position.as_deref()),
        }
    }

    /// True when nothing in the identity can address a record.
    pub fn is_empty(&self) -> bool {
        self.uuid.is_none() && self.email.is_none() && self.linkedin_handle.is_none()
    }

    pub fn fetch_identity(&self) -> FetchIdentity {
        FetchIdentity {
            linkedin_handle: self.linkedin_handle.clone(),
            email: self.email.clone(),
        }
    }
}

/// The subset of an identity a provider adapter is allowed to see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchIdentity {
    pub linkedin_handle: Option<String>,
    pub email: Option<String>,
}

/// Canonical projection of an enriched person, published to downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub uuid: Uuid,
    pub name: Option<String>,
    pub company: Option<String>,
    pub position: Option<String>,
    pub linkedin_handle: Option<String>,
    pub email: Option<String>,
}

/// Lowercased, trimmed email; `None` for blanks or strings without an `@`.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return None;
    }
    Some(email)
}

/// Reduce any LinkedIn profile reference to its short handle.
///
/// Accepts bare handles (`jane-doe`), paths (`/in/jane-doe/`) and full URLs
/// (`https://www.linkedin.com/in/Jane-Doe/?trk=x`); all map to `jane-doe`.
pub fn normalize_linkedin_handle(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest;
        }
    }
    if let Some(idx) = s.find("linkedin.com") {
        s = &s[idx + "linkedin.com".len()..];
    }
    let s = s.split(['?', '#']).next().unwrap_or_default();
    let s = s.trim_start_matches('/');
    let s = s
        .strip_prefix("in/")
        .or_else(|| s.strip_prefix("pub/"))
        .unwrap_or(s);
    let handle = s.trim_start_matches('/').split('/').next().unwrap_or_default().trim();
    if handle.is_empty() {
        return None;
    }
    Some(handle.to_lowercase())
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
