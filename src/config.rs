//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::worker::GENERAL_CAPABILITY;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Supervisor name for identification in logs.
    pub name: String,
    /// Number of workers created at start.
    pub worker_count: usize,
    /// Capabilities advertised by every worker created at start.
    pub worker_capabilities: Vec<String>,
    /// Maximum number of task ids waiting in the queue.
    pub queue_capacity: usize,
    /// Maximum number of undelivered terminal results.
    pub result_capacity: usize,
    /// How long `submit` waits on a full queue before failing.
    pub enqueue_timeout: Duration,
    /// Idle worker wake-up interval (heartbeat + stop check).
    pub poll_interval: Duration,
    /// Delay before an undispatchable task is put back in the queue.
    pub requeue_delay: Duration,
    /// Delay before a failed attempt re-enters the queue.
    pub retry_backoff: Duration,
    /// Optional deadline for a single handler invocation.
    pub task_timeout: Option<Duration>,
    /// Grace period `stop` waits for loops to exit.
    pub shutdown_grace: Duration,
    /// Attempts given to tasks that do not set their own.
    pub default_max_attempts: u32,
    /// Dispatch misses before a starvation warning is logged for a task.
    pub starvation_warn_after: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "task-supervisor".to_string(),
            worker_count: 4,
            worker_capabilities: ["analysis", "generation", "testing", GENERAL_CAPABILITY]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            queue_capacity: 100,
            result_capacity: 100,
            enqueue_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            requeue_delay: Duration::from_millis(50),
            retry_backoff: Duration::ZERO,
            task_timeout: None,
            shutdown_grace: Duration::from_millis(500),
            default_max_attempts: 3,
            starvation_warn_after: 100,
        }
    }
}

impl SupervisorConfig {
    /// Build config from `TASK_SUPERVISOR_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup (used by `from_env`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("TASK_SUPERVISOR_NAME") {
            config.name = name;
        }
        if let Some(n) = parse_var(&lookup, "TASK_SUPERVISOR_WORKERS")? {
            config.worker_count = n;
        }
        if let Some(caps) = lookup("TASK_SUPERVISOR_CAPABILITIES") {
            config.worker_capabilities = caps
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(n) = parse_var(&lookup, "TASK_SUPERVISOR_QUEUE_CAPACITY")? {
            config.queue_capacity = n;
        }
        if let Some(n) = parse_var(&lookup, "TASK_SUPERVISOR_RESULT_CAPACITY")? {
            config.result_capacity = n;
        }
        if let Some(ms) = parse_var(&lookup, "TASK_SUPERVISOR_ENQUEUE_TIMEOUT_MS")? {
            config.enqueue_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "TASK_SUPERVISOR_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "TASK_SUPERVISOR_REQUEUE_DELAY_MS")? {
            config.requeue_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "TASK_SUPERVISOR_RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TASK_SUPERVISOR_TASK_TIMEOUT_MS")? {
            // 0 disables the deadline
            config.task_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var(&lookup, "TASK_SUPERVISOR_SHUTDOWN_GRACE_MS")? {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "TASK_SUPERVISOR_MAX_ATTEMPTS")? {
            config.default_max_attempts = n;
        }
        if let Some(n) = parse_var(&lookup, "TASK_SUPERVISOR_STARVATION_WARN_AFTER")? {
            config.starvation_warn_after = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be positive"));
        }
        if self.result_capacity == 0 {
            return Err(invalid("result_capacity", "must be positive"));
        }
        if self.default_max_attempts == 0 {
            return Err(invalid("default_max_attempts", "must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be positive"));
        }
        if self.task_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("task_timeout", "must be positive when set"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ParseError {
                key: key.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SupervisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 100);
        assert!(config.worker_capabilities.iter().any(|c| c == "general"));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = SupervisorConfig::from_lookup(lookup_from(&[
            ("TASK_SUPERVISOR_WORKERS", "8"),
            ("TASK_SUPERVISOR_CAPABILITIES", "generation, general"),
            ("TASK_SUPERVISOR_ENQUEUE_TIMEOUT_MS", "250"),
            ("TASK_SUPERVISOR_TASK_TIMEOUT_MS", "1000"),
        ]))
        .unwrap();

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.worker_capabilities, vec!["generation", "general"]);
        assert_eq!(config.enqueue_timeout, Duration::from_millis(250));
        assert_eq!(config.task_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn zero_task_timeout_disables_deadline() {
        let config =
            SupervisorConfig::from_lookup(lookup_from(&[("TASK_SUPERVISOR_TASK_TIMEOUT_MS", "0")]))
                .unwrap();
        assert!(config.task_timeout.is_none());
    }

    #[test]
    fn unparsable_value_is_rejected() {
        let result =
            SupervisorConfig::from_lookup(lookup_from(&[("TASK_SUPERVISOR_WORKERS", "many")]));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let config = SupervisorConfig {
            queue_capacity: 0,
            ..SupervisorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "queue_capacity"
        ));
    }
}
