//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::ConfigError;
use crate::queue::RetryPolicy;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Bound on queued plus admitting tasks. Retries are exempt.
    pub queue_capacity: usize,
    /// Waiting this long promotes a queued task by one priority level.
    pub aging_threshold: Duration,
    /// Upper bound on a single Recall Store query.
    pub enrichment_timeout: Duration,
    /// Maximum memories merged into a task's metadata.
    pub max_recalled: usize,
    /// Default bound for `shutdown` when the caller does not give one.
    pub drain_timeout: Duration,
    /// How long a running task may take to acknowledge cancellation.
    pub cancel_grace: Duration,
    /// Total executions allowed per submission, the first one included.
    pub retry_budget: u32,
    pub retry_backoff: RetryPolicy,
    /// Total `record` calls per outcome.
    pub record_retry_budget: u32,
    pub record_backoff: RetryPolicy,
    /// Delay between recovery probes of an unhealthy worker.
    pub probe_backoff: RetryPolicy,
    /// Terminal tasks kept for `status` / `await_result` before eviction.
    pub retention_capacity: usize,
    /// Buffer of the lifecycle event channel.
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 1024,
            aging_threshold: Duration::from_secs(30),
            enrichment_timeout: Duration::from_secs(2),
            max_recalled: 8,
            drain_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(5),
            retry_budget: 3,
            retry_backoff: RetryPolicy::task_default(),
            record_retry_budget: 3,
            record_backoff: RetryPolicy::record_default(),
            probe_backoff: RetryPolicy::probe_default(),
            retention_capacity: 10_000,
            event_buffer: 1024,
        }
    }
}

impl OrchestratorConfig {
    pub const ENV_WORKERS: &'static str = "SYNAPSE_WORKERS";
    pub const ENV_QUEUE_CAPACITY: &'static str = "SYNAPSE_QUEUE_CAPACITY";
    pub const ENV_AGING_MS: &'static str = "SYNAPSE_AGING_MS";
    pub const ENV_ENRICH_TIMEOUT_MS: &'static str = "SYNAPSE_ENRICH_TIMEOUT_MS";
    pub const ENV_MAX_RECALLED: &'static str = "SYNAPSE_MAX_RECALLED";
    pub const ENV_DRAIN_TIMEOUT_MS: &'static str = "SYNAPSE_DRAIN_TIMEOUT_MS";
    pub const ENV_CANCEL_GRACE_MS: &'static str = "SYNAPSE_CANCEL_GRACE_MS";
    pub const ENV_RETRY_BUDGET: &'static str = "SYNAPSE_RETRY_BUDGET";
    pub const ENV_RECORD_RETRIES: &'static str = "SYNAPSE_RECORD_RETRIES";
    pub const ENV_PROBE_CEILING_MS: &'static str = "SYNAPSE_PROBE_CEILING_MS";
    pub const ENV_RETENTION: &'static str = "SYNAPSE_RETENTION";

    /// Defaults overridden by `SYNAPSE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = EnvReader { lookup: &lookup };

        env.parse(Self::ENV_WORKERS, &mut config.worker_count)?;
        env.parse(Self::ENV_QUEUE_CAPACITY, &mut config.queue_capacity)?;
        env.millis(Self::ENV_AGING_MS, &mut config.aging_threshold)?;
        env.millis(Self::ENV_ENRICH_TIMEOUT_MS, &mut config.enrichment_timeout)?;
        env.parse(Self::ENV_MAX_RECALLED, &mut config.max_recalled)?;
        env.millis(Self::ENV_DRAIN_TIMEOUT_MS, &mut config.drain_timeout)?;
        env.millis(Self::ENV_CANCEL_GRACE_MS, &mut config.cancel_grace)?;
        env.parse(Self::ENV_RETRY_BUDGET, &mut config.retry_budget)?;
        env.parse(Self::ENV_RECORD_RETRIES, &mut config.record_retry_budget)?;
        env.millis(Self::ENV_PROBE_CEILING_MS, &mut config.probe_backoff.max_delay)?;
        env.parse(Self::ENV_RETENTION, &mut config.retention_capacity)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("worker_count", self.worker_count)?;
        positive("queue_capacity", self.queue_capacity)?;
        positive("max_recalled", self.max_recalled)?;
        positive("retry_budget", self.retry_budget as usize)?;
        positive("record_retry_budget", self.record_retry_budget as usize)?;
        positive("retention_capacity", self.retention_capacity)?;
        positive("event_buffer", self.event_buffer)?;

        non_zero("aging_threshold", self.aging_threshold)?;
        non_zero("enrichment_timeout", self.enrichment_timeout)?;
        non_zero("drain_timeout", self.drain_timeout)?;
        non_zero("cancel_grace", self.cancel_grace)?;

        backoff("retry_backoff", &self.retry_backoff)?;
        backoff("record_backoff", &self.record_backoff)?;
        backoff("probe_backoff", &self.probe_backoff)?;
        Ok(())
    }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, key: &str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = (self.lookup)(key) {
            *slot = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            })?;
        }
        Ok(())
    }

    fn millis(&self, key: &str, slot: &mut Duration) -> Result<(), ConfigError> {
        let mut ms = slot.as_millis() as u64;
        self.parse(key, &mut ms)?;
        *slot = Duration::from_millis(ms);
        Ok(())
    }
}

fn positive(key: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn non_zero(key: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "duration must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn backoff(key: &str, policy: &RetryPolicy) -> Result<(), ConfigError> {
    if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("multiplier must be >= 1.0, got {}", policy.multiplier),
        });
    }
    if policy.max_delay < policy.base_delay {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "max_delay must not be below base_delay".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.aging_threshold, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("SYNAPSE_WORKERS", "8"),
            ("SYNAPSE_AGING_MS", "1500"),
            ("SYNAPSE_PROBE_CEILING_MS", "60000"),
        ]))
        .unwrap();

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.aging_threshold, Duration::from_millis(1500));
        assert_eq!(config.probe_backoff.max_delay, Duration::from_secs(60));
        assert_eq!(config.queue_capacity, 1024);
    }

    #[test]
    fn unparsable_value_names_the_key() {
        let err =
            OrchestratorConfig::from_lookup(lookup(&[("SYNAPSE_QUEUE_CAPACITY", "lots")]))
                .unwrap_err();
        let ConfigError::InvalidValue { key, .. } = err;
        assert_eq!(key, "SYNAPSE_QUEUE_CAPACITY");
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = OrchestratorConfig::from_lookup(lookup(&[("SYNAPSE_WORKERS", "0")]))
            .unwrap_err();
        let ConfigError::InvalidValue { key, .. } = err;
        assert_eq!(key, "worker_count");
    }

    #[test]
    fn zero_aging_threshold_is_rejected() {
        let config = OrchestratorConfig {
            aging_threshold: Duration::ZERO,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn shrinking_backoff_is_rejected() {
        let mut config = OrchestratorConfig::default();
        config.retry_backoff.multiplier = 0.5;
        assert!(config.validate().is_err());
    }
}
