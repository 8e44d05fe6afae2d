use crate::error::SupervisorResult;
use crate::models::{AnalyticsReport, Project, ProjectCreated, ProjectKey, ProjectSummary};
use crate::services::ProjectFiles;
use crate::state::AppState;

const FILE_LIST_DEPTH: usize = 8;

pub async fn register_project(state: &AppState, created: ProjectCreated) -> SupervisorResult<Project> {
    state.supervisor.register(created).await
}

pub async fn list_projects(state: &AppState, owner_id: &str) -> Vec<ProjectSummary> {
    state.supervisor.list_projects(owner_id).await
}

pub async fn running_count(state: &AppState, owner_id: &str) -> usize {
    state.supervisor.running_count(owner_id).await
}

/// Relative paths of the project's files, without installed modules.
pub async fn list_project_files(
    state: &AppState,
    owner_id: &str,
    project_id: &str,
) -> SupervisorResult<Vec<String>> {
    let root = state
        .supervisor
        .root_path(&ProjectKey::new(owner_id, project_id))
        .await?;
    Ok(ProjectFiles::list_files(&root, FILE_LIST_DEPTH))
}

pub async fn project_analytics(
    state: &AppState,
    owner_id: &str,
    project_id: &str,
) -> SupervisorResult<AnalyticsReport> {
    state
        .supervisor
        .analytics(&ProjectKey::new(owner_id, project_id))
        .await
}

pub async fn owner_analytics(state: &AppState, owner_id: &str) -> Vec<(ProjectSummary, AnalyticsReport)> {
    state.supervisor.owner_analytics(owner_id).await
}
