use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::models::FetchIdentity;
use crate::providers::{ProviderAdapter, ProviderPayload, ProviderResult};
use crate::records::models::{ProfileFields, ProviderKind};

/// Adapter that plays back scripted results and counts calls.
pub(crate) struct ScriptedProvider {
    kind: ProviderKind,
    script: Mutex<VecDeque<ProviderResult>>,
    fallback: ProviderResult,
    calls: AtomicU32,
    seen: Mutex<Vec<FetchIdentity>>,
}

impl ScriptedProvider {
    pub(crate) fn new(kind: ProviderKind, fallback: ProviderResult) -> Self {
        Self {
            kind,
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn then(self, result: ProviderResult) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<FetchIdentity> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn fetch(&self, identity: &FetchIdentity) -> ProviderResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(identity.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

pub(crate) fn profile(name: &str, company: &str, handle: Option<&str>) -> ProviderResult {
    let fields = ProfileFields {
        name: Some(name.to_string()),
        company: Some(company.to_string()),
        position: None,
        linkedin_handle: handle.map(str::to_string),
    };
    ProviderResult::Success(ProviderPayload {
        raw: serde_json::json!({ "name": name, "company": company, "handle": handle }),
        fields,
        posts: Vec::new(),
    })
}
