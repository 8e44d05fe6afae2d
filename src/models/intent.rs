use super::{LogEntry, ProjectStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Start,
    Stop,
    Remove,
    Console,
    Share,
    Backup,
}

/// A user command as delivered by the messaging front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub owner_id: String,
    pub project_id: String,
}

impl Intent {
    pub fn new(kind: IntentKind, owner_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            kind,
            owner_id: owner_id.into(),
            project_id: project_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub ok: bool,
    pub status: Option<ProjectStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_tail: Option<Vec<LogEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_code: Option<String>,
    /// Project root handed to the external archiver (backup) or file cleaner (remove).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntentResult {
    pub fn success(status: Option<ProjectStatus>) -> Self {
        Self {
            ok: true,
            status,
            logs_tail: None,
            share_code: None,
            root_path: None,
            error: None,
        }
    }

    pub fn failure(status: Option<ProjectStatus>, error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            ..Self::success(status)
        }
    }
}
