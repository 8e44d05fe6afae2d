use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identity of a supervised project: `(owner_id, project_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectKey {
    pub owner_id: String,
    pub project_id: String,
}

impl ProjectKey {
    pub fn new(owner_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            project_id: project_id.into(),
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.project_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub key: ProjectKey,
    pub main_file: String,
    pub root_path: PathBuf,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub last_started_at: Option<DateTime<Utc>>,
}

impl Project {
    pub fn new(created: ProjectCreated) -> Self {
        Self {
            key: ProjectKey::new(created.owner_id, created.project_id),
            main_file: created.main_file,
            root_path: created.root_path,
            status: ProjectStatus::Stopped,
            created_at: Utc::now(),
            last_started_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProjectStatus::Running
    }
}

/// Raised by file ingestion once a project's files sit under `root_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCreated {
    pub owner_id: String,
    pub project_id: String,
    pub main_file: String,
    pub root_path: PathBuf,
}

/// Point-in-time status for live viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ProjectStatus,
    pub last_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: String,
    pub main_file: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        Self {
            project_id: project.key.project_id.clone(),
            main_file: project.main_file.clone(),
            status: project.status,
            created_at: project.created_at,
        }
    }
}
