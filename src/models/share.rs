use super::ProjectKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only grant onto another owner's console and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareToken {
    pub code: String,
    pub key: ProjectKey,
    pub issued_at: DateTime<Utc>,
}
