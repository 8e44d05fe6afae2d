//! Error types for supervisor operations.

use crate::models::ProjectKey;
use thiserror::Error;

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Errors returned synchronously to callers.
///
/// Runtime failures of a supervised program (crash exits, missing modules,
/// failed installs) never surface here; they end up as log entries and a
/// final project status.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("project not found: {0}")]
    NotFound(ProjectKey),

    #[error("project already registered: {0}")]
    AlreadyRegistered(ProjectKey),

    #[error("project is already running: {0}")]
    AlreadyRunning(ProjectKey),

    #[error("project is not running: {0}")]
    NotRunning(ProjectKey),

    #[error("failed to spawn {key}: {reason}")]
    SpawnFailed { key: ProjectKey, reason: String },

    #[error("share code not found: {0}")]
    ShareCodeNotFound(String),

    #[error("share code expired: {0}")]
    ShareCodeExpired(String),

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
