//! Worker lifecycle configuration

use quarry_core::IsolationMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Worker lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Queues to poll, in priority order. `*` expands to every known queue.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,

    /// Sleep between empty reservation passes. Zero drains the queues once.
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_interval")]
    pub interval: Duration,

    /// Grace period between a forwarded SIGTERM and SIGKILL
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_term_timeout")]
    pub term_timeout: Duration,

    /// Forward SIGTERM to the running job on TERM/INT
    #[serde(default = "crate::domains::utils::default_false")]
    pub term_child: bool,

    /// How each job is isolated from the worker
    #[serde(default)]
    pub isolation: IsolationMode,

    #[serde(default = "crate::domains::utils::default_false")]
    pub verbose: bool,

    #[serde(default = "crate::domains::utils::default_false")]
    pub very_verbose: bool,

    /// Translate QUIT/TERM/INT/USR1/USR2/CONT into lifecycle events
    #[serde(default = "crate::domains::utils::default_true")]
    pub install_signal_handlers: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: default_queues(),
            interval: default_interval(),
            term_timeout: default_term_timeout(),
            term_child: false,
            isolation: IsolationMode::default(),
            verbose: false,
            very_verbose: false,
            install_signal_handlers: true,
        }
    }
}

impl WorkerConfig {
    /// Configured queue names with surrounding whitespace and blanks removed
    pub fn queue_names(&self) -> Vec<String> {
        self.queues
            .iter()
            .map(|queue| queue.trim())
            .filter(|queue| !queue.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Validatable for WorkerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.queue_names().is_empty() {
            return Err(self.validation_error("at least one queue must be configured"));
        }

        validate_positive(self.term_timeout.as_secs_f64(), "term_timeout", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "worker"
    }
}

fn default_queues() -> Vec<String> {
    vec![quarry_core::WILDCARD_QUEUE.to_string()]
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_term_timeout() -> Duration {
    Duration::from_secs(4)
}
