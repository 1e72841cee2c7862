use std::time::Duration;

use super::{Error, Result};

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Deliveries handed out this many times without an ack are dead-lettered.
    pub max_deliveries: u32,
    /// How long a received delivery stays invisible to other consumers.
    pub lease: Duration,

    pub redelivery_backoff_base_ms: u64,
    pub redelivery_backoff_max_ms: u64,

    pub max_payload_bytes: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 10,
            lease: Duration::from_secs(600),
            redelivery_backoff_base_ms: 1_000,
            redelivery_backoff_max_ms: 60_000,
            max_payload_bytes: 1_000_000,
        }
    }
}

impl EventBusConfig {
    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.max_deliveries == 0 {
            return Err(Error::message("max_deliveries must be > 0"));
        }
        if self.redelivery_backoff_max_ms < self.redelivery_backoff_base_ms {
            return Err(Error::message(
                "redelivery_backoff_max_ms must be >= redelivery_backoff_base_ms",
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(Error::message("max_payload_bytes must be > 0"));
        }
        Ok(())
    }

    /// Delay before a nacked delivery becomes visible again.
    #[tracing::instrument(level = "debug")]
    pub fn redelivery_backoff(&self, attempts: u32) -> Duration {
        // Exponential backoff: base * 2^(attempts-1), capped.
        let shift = attempts.saturating_sub(1).min(63);
        let exp = 1u128 << shift;
        let ms = (self.redelivery_backoff_base_ms as u128).saturating_mul(exp);
        Duration::from_millis(ms.min(self.redelivery_backoff_max_ms as u128) as u64)
    }

    pub(crate) fn check_payload(&self, payload: &serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| Error::message(format!("invalid payload json: {e}")))?;
        if bytes.len() > self.max_payload_bytes {
            return Err(Error::PayloadTooLarge);
        }
        Ok(())
    }
}
