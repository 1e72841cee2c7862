//! Runtime configuration for the enrichment worker, read from `ENRICH_*` variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::events::config::EventBusConfig;
use crate::orchestrator::{ConsumerConfig, OrchestratorConfig};
use crate::records::models::ProviderKind;
use crate::retry::RetryPolicy;
use crate::staleness::StalenessPolicy;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Bearer token or API key, depending on the provider.
    pub credential: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub graph: Option<EndpointConfig>,
    pub contacts: Option<EndpointConfig>,
    pub social: Option<EndpointConfig>,
    /// Per-request timeout for every outbound provider call.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Directory holding `events.db` and `records.db`.
    pub data_dir: PathBuf,
    pub scope: String,
    pub consumer_group: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub handler_timeout: Duration,
    pub bus: EventBusConfig,
    pub staleness: StalenessPolicy,
    pub retry: RetryPolicy,
    pub priority: Vec<ProviderKind>,
    pub providers: ProviderEndpoints,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        let consumer = ConsumerConfig::default();
        Self {
            data_dir: PathBuf::from("./data"),
            scope: orchestrator.scope,
            consumer_group: consumer.group,
            batch_size: consumer.batch_size,
            poll_interval: consumer.poll_interval,
            handler_timeout: consumer.handler_timeout,
            bus: EventBusConfig::default(),
            staleness: orchestrator.staleness,
            retry: orchestrator.retry,
            priority: orchestrator.priority,
            providers: ProviderEndpoints {
                graph: None,
                contacts: None,
                social: None,
                timeout: Duration::from_secs(30),
            },
        }
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|_| Error::InvalidInput(format!("{name} must be a number, got {v:?}"))),
    }
}

/// Parse a comma-separated provider list, e.g. `contacts,graph,social`.
pub fn parse_priority(raw: &str) -> Result<Vec<ProviderKind>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let kind = ProviderKind::parse(part)
            .ok_or_else(|| Error::InvalidInput(format!("unknown provider {part:?}")))?;
        if !out.contains(&kind) {
            out.push(kind);
        }
    }
    Ok(out)
}

impl EnrichmentConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (the process env in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let non_empty = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        let days = |name: &str, default: chrono::Duration| -> Result<chrono::Duration> {
            let n = parse_num(name, get(name), default.num_days())?;
            Ok(chrono::Duration::days(n))
        };
        let millis = |name: &str, default: Duration| -> Result<Duration> {
            let n = parse_num(name, get(name), default.as_millis() as u64)?;
            Ok(Duration::from_millis(n))
        };
        let endpoint = |base: &str, cred: &str| {
            non_empty(base).map(|base_url| EndpointConfig {
                base_url,
                credential: non_empty(cred),
            })
        };

        let priority = match non_empty("ENRICH_PROVIDER_PRIORITY") {
            Some(v) => parse_priority(&v)?,
            None => d.priority.clone(),
        };

        let cfg = Self {
            data_dir: non_empty("ENRICH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            scope: non_empty("ENRICH_SCOPE").unwrap_or(d.scope),
            consumer_group: non_empty("ENRICH_CONSUMER_GROUP").unwrap_or(d.consumer_group),
            batch_size: parse_num("ENRICH_BATCH_SIZE", get("ENRICH_BATCH_SIZE"), d.batch_size)?,
            poll_interval: millis("ENRICH_POLL_INTERVAL_MS", d.poll_interval)?,
            handler_timeout: millis("ENRICH_HANDLER_TIMEOUT_MS", d.handler_timeout)?,
            bus: EventBusConfig {
                lease: millis("ENRICH_LEASE_MS", d.bus.lease)?,
                max_deliveries: parse_num(
                    "ENRICH_MAX_DELIVERIES",
                    get("ENRICH_MAX_DELIVERIES"),
                    d.bus.max_deliveries,
                )?,
                ..d.bus
            },
            staleness: StalenessPolicy {
                profile_ttl: days("ENRICH_TTL_PROFILE_DAYS", d.staleness.profile_ttl)?,
                posts_ttl: days("ENRICH_TTL_POSTS_DAYS", d.staleness.posts_ttl)?,
                failed_ttl: days("ENRICH_TTL_FAILED_DAYS", d.staleness.failed_ttl)?,
            },
            retry: RetryPolicy {
                max_attempts: parse_num(
                    "ENRICH_RETRY_MAX_ATTEMPTS",
                    get("ENRICH_RETRY_MAX_ATTEMPTS"),
                    d.retry.max_attempts,
                )?,
                base_delay: millis("ENRICH_RETRY_BASE_MS", d.retry.base_delay)?,
                max_delay: millis("ENRICH_RETRY_MAX_DELAY_MS", d.retry.max_delay)?,
                max_jitter: millis("ENRICH_RETRY_JITTER_MS", d.retry.max_jitter)?,
            },
            priority,
            providers: ProviderEndpoints {
                graph: endpoint("ENRICH_GRAPH_API_BASE", "ENRICH_GRAPH_API_TOKEN"),
                contacts: endpoint("ENRICH_CONTACTS_API_BASE", "ENRICH_CONTACTS_API_KEY"),
                social: endpoint("ENRICH_SOCIAL_API_BASE", "ENRICH_SOCIAL_API_TOKEN"),
                timeout: millis("ENRICH_PROVIDER_TIMEOUT_MS", d.providers.timeout)?,
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if self.scope.trim().is_empty() {
            return Err(Error::InvalidInput("scope is empty".to_string()));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(Error::InvalidInput("consumer_group is empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be > 0".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidInput("poll_interval must be > 0".to_string()));
        }
        if self.handler_timeout.is_zero() {
            return Err(Error::InvalidInput("handler_timeout must be > 0".to_string()));
        }
        self.bus
            .validate()
            .map_err(|e| Error::InvalidInput(format!("event bus: {e}")))?;
        // A lease that can lapse mid-handler hands the delivery to a second worker.
        if self.bus.lease <= self.handler_timeout {
            return Err(Error::InvalidInput(format!(
                "lease ({:?}) must be longer than handler_timeout ({:?})",
                self.bus.lease, self.handler_timeout
            )));
        }

        let ttls = [
            ("ttl_profile", self.staleness.profile_ttl),
            ("ttl_posts", self.staleness.posts_ttl),
            ("ttl_failed", self.staleness.failed_ttl),
        ];
        for (name, ttl) in ttls {
            if ttl <= chrono::Duration::zero() {
                return Err(Error::InvalidInput(format!("{name} must be > 0 days")));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "retry.max_attempts must be > 0".to_string(),
            ));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(Error::InvalidInput(
                "retry.max_delay must be >= retry.base_delay".to_string(),
            ));
        }
        if self.priority.is_empty() {
            return Err(Error::InvalidInput("provider priority is empty".to_string()));
        }
        if self.providers.timeout.is_zero() {
            return Err(Error::InvalidInput("provider timeout must be > 0".to_string()));
        }
        for ep in [
            &self.providers.graph,
            &self.providers.contacts,
            &self.providers.social,
        ]
        .into_iter()
        .flatten()
        {
            if !(ep.base_url.starts_with("http://") || ep.base_url.starts_with("https://")) {
                return Err(Error::InvalidInput(format!(
                    "provider base url must be http(s): {}",
                    ep.base_url
                )));
            }
        }
        Ok(())
    }

    pub fn events_db_path(&self) -> PathBuf {
        self.data_dir.join("events.db")
    }

    pub fn records_db_path(&self) -> PathBuf {
        self.data_dir.join("records.db")
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            scope: self.scope.clone(),
            priority: self.priority.clone(),
            retry: self.retry.clone(),
            staleness: self.staleness,
            ..OrchestratorConfig::default()
        }
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            group: self.consumer_group.clone(),
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
            handler_timeout: self.handler_timeout,
            ..ConsumerConfig::default()
        }
    }
}
