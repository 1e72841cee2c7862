//! Per-message enrichment: the orchestrator and the consumer loop that feeds it.

pub mod consumer;
pub mod engine;
#[cfg(test)]
pub(crate) mod testing;

pub use consumer::{BatchStats, ConsumerConfig, ConsumerRunner, EventHandler};
pub use engine::{EnrichmentOrchestrator, OrchestratorConfig, PassOutcome};
