//! Concrete provider adapters.

#[cfg(feature = "contacts")]
pub mod contacts;
#[cfg(feature = "graph")]
pub mod graph;
pub mod http;
#[cfg(feature = "social")]
pub mod social;

use std::sync::Arc;

use enrichment_core::{EnrichmentConfig, ProviderAdapter, Result};

/// Build an adapter for every provider that has an endpoint configured and whose
/// feature is compiled in.
pub fn build_adapters(cfg: &EnrichmentConfig) -> Result<Vec<Arc<dyn ProviderAdapter>>> {
    #[allow(unused_mut)]
    let mut out: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    #[allow(unused_variables)]
    let timeout = cfg.providers.timeout;

    #[cfg(feature = "contacts")]
    {
        if let Some(ep) = &cfg.providers.contacts {
            out.push(Arc::new(contacts::ContactsProviderAdapter::new(ep, timeout)?));
        }
    }
    #[cfg(feature = "graph")]
    {
        if let Some(ep) = &cfg.providers.graph {
            out.push(Arc::new(graph::GraphProviderAdapter::new(ep, timeout)?));
        }
    }
    #[cfg(feature = "social")]
    {
        if let Some(ep) = &cfg.providers.social {
            out.push(Arc::new(social::SocialScraperAdapter::new(ep, timeout)?));
        }
    }

    if out.is_empty() {
        tracing::warn!("no provider endpoints configured; records will be created but never enriched");
    }
    Ok(out)
}
