use super::{ProjectKey, StatusReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The live OS process currently bound to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub key: ProjectKey,
    pub generation: u64,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Arrival order within the project; timestamps may tie, this never does.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub text: String,
}

/// Status plus the most recent log lines, as shown on a console page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleView {
    pub key: ProjectKey,
    pub status: StatusReport,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Lifecycle notifications for external notifiers (chat replies and the like).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// First spawn of a run; not repeated by crash restarts until a manual stop.
    Started { key: ProjectKey },
    Exited { key: ProjectKey, code: Option<i32> },
    RestartScheduled { key: ProjectKey, delay_ms: u64 },
    DependencyInstalled { key: ProjectKey, module: String },
    InstallFailed { key: ProjectKey, module: String, code: Option<i32> },
    SpawnFailed { key: ProjectKey, reason: String },
    Stopped { key: ProjectKey },
}

impl LifecycleEvent {
    pub fn key(&self) -> &ProjectKey {
        match self {
            Self::Started { key }
            | Self::Exited { key, .. }
            | Self::RestartScheduled { key, .. }
            | Self::DependencyInstalled { key, .. }
            | Self::InstallFailed { key, .. }
            | Self::SpawnFailed { key, .. }
            | Self::Stopped { key } => key,
        }
    }
}
