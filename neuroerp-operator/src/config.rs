//! Operator configuration.
//!
//! Values come from environment variables with sensible defaults:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `NEUROERP_RESYNC_SECS` | 30 | Resync interval for single-resource specs |
//! | `NEUROERP_MULTI_RESYNC_SECS` | 300 | Resync interval for multi-component specs |
//! | `NEUROERP_PASS_TIMEOUT_SECS` | 60 | Deadline for one reconcile pass |
//! | `NEUROERP_ERROR_REQUEUE_SECS` | 30 | Requeue delay after a failed pass |
//! | `NEUROERP_MAX_CONDITIONS` | 32 | Retained condition history |
//! | `NEUROERP_WATCH_NAMESPACE` | all | Restrict the watch to one namespace |
//!
//! # Example
//!
//! ```
//! use neuroerp_operator::config::OperatorConfig;
//! use std::time::Duration;
//!
//! let config = OperatorConfig::new()
//!     .resync_interval(Duration::from_secs(10))
//!     .watch_namespace("erp");
//! assert_eq!(config.resync_interval, Duration::from_secs(10));
//! ```

use std::time::Duration;

/// Runtime configuration for the reconciler and the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Resync interval for specs without modules.
    pub resync_interval: Duration,

    /// Resync interval for specs declaring modules.
    pub multi_component_resync_interval: Duration,

    /// Deadline applied to every reconcile pass.
    pub pass_timeout: Duration,

    /// Requeue delay used by the error policy.
    pub error_requeue: Duration,

    /// Maximum number of conditions kept in status.
    pub max_conditions: usize,

    /// Namespace to watch; `None` watches all namespaces.
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            resync_interval: default_resync_interval(),
            multi_component_resync_interval: default_multi_component_resync_interval(),
            pass_timeout: default_pass_timeout(),
            error_requeue: default_error_requeue(),
            max_conditions: default_max_conditions(),
            watch_namespace: None,
        }
    }
}

impl OperatorConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `NEUROERP_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = parse_var(&lookup, "NEUROERP_RESYNC_SECS") {
            config.resync_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "NEUROERP_MULTI_RESYNC_SECS") {
            config.multi_component_resync_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "NEUROERP_PASS_TIMEOUT_SECS") {
            config.pass_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "NEUROERP_ERROR_REQUEUE_SECS") {
            config.error_requeue = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var(&lookup, "NEUROERP_MAX_CONDITIONS") {
            config.max_conditions = max as usize;
        }
        config.watch_namespace = lookup("NEUROERP_WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        config
    }

    /// Set the single-resource resync interval.
    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Set the multi-component resync interval.
    pub fn multi_component_resync_interval(mut self, interval: Duration) -> Self {
        self.multi_component_resync_interval = interval;
        self
    }

    /// Set the per-pass deadline.
    pub fn pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = timeout;
        self
    }

    /// Set the error requeue delay.
    pub fn error_requeue(mut self, delay: Duration) -> Self {
        self.error_requeue = delay;
        self
    }

    /// Set the retained condition history.
    pub fn max_conditions(mut self, max: usize) -> Self {
        self.max_conditions = max;
        self
    }

    /// Restrict the watch to a namespace.
    pub fn watch_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.watch_namespace = Some(namespace.into());
        self
    }

    /// Resync interval appropriate for a spec with `component_count` declared modules.
    pub fn resync_for(&self, component_count: usize) -> Duration {
        if component_count > 0 {
            self.multi_component_resync_interval
        } else {
            self.resync_interval
        }
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(variable = key, value = %raw, error = %e, "Ignoring invalid value");
            None
        }
    }
}

fn default_resync_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_multi_component_resync_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_pass_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_error_requeue() -> Duration {
    Duration::from_secs(30)
}

fn default_max_conditions() -> usize {
    32
}
