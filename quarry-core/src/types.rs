//! Core type definitions for Quarry

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Queue spec entry that expands to every queue known to the store
pub const WILDCARD_QUEUE: &str = "*";

/// How a worker isolates job execution from its own process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Fork a child process per job
    Fork,
    /// Run each job on a supervised blocking thread
    Thread,
    /// Run each job on the worker's own task, like `process()`
    Inline,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::Fork => "fork",
            IsolationMode::Thread => "thread",
            IsolationMode::Inline => "inline",
        }
    }

    /// Whether fork hooks run around this mode's executions
    pub fn is_isolated(&self) -> bool {
        !matches!(self, IsolationMode::Inline)
    }
}

impl Default for IsolationMode {
    #[cfg(unix)]
    fn default() -> Self {
        IsolationMode::Fork
    }

    #[cfg(not(unix))]
    fn default() -> Self {
        IsolationMode::Thread
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IsolationMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fork" => Ok(IsolationMode::Fork),
            "thread" => Ok(IsolationMode::Thread),
            "inline" => Ok(IsolationMode::Inline),
            _ => Err(ParseError::InvalidIsolationMode(s.to_string())),
        }
    }
}

/// Identity of a worker process: `host:pid:queue1,queue2`
///
/// The queue list is the trimmed configured spec, wildcard included, so two
/// workers on one host can be told apart by their pid alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId {
    pub host: String,
    pub pid: u32,
    pub queues: Vec<String>,
}

impl WorkerId {
    pub fn new(host: impl Into<String>, pid: u32, queues: Vec<String>) -> Self {
        Self {
            host: host.into(),
            pid,
            queues,
        }
    }

    /// Identity of the current process on the local host.
    pub fn current(queues: Vec<String>) -> Self {
        Self::new(local_hostname(), std::process::id(), queues)
    }

    pub fn is_local(&self) -> bool {
        self.host == local_hostname()
    }
}

/// Host name of this machine, `localhost` when it cannot be determined
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.pid, self.queues.join(","))
    }
}

impl FromStr for WorkerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let host = parts.next().filter(|h| !h.is_empty());
        let pid = parts.next().and_then(|p| p.parse::<u32>().ok());
        let queues = parts.next();

        match (host, pid, queues) {
            (Some(host), Some(pid), Some(queues)) => Ok(WorkerId {
                host: host.to_string(),
                pid,
                queues: queues
                    .split(',')
                    .filter(|q| !q.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            _ => Err(ParseError::InvalidWorkerId(s.to_string())),
        }
    }
}
