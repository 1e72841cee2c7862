//! HTTP adapters for the external enrichment providers.
//!
//! Each adapter is behind a cargo feature of the same name and implements
//! `enrichment_core::ProviderAdapter`.

pub mod providers;

pub use providers::build_adapters;
