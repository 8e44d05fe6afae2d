use crate::error::SupervisorResult;
use crate::models::{InstanceInfo, Project, ProjectKey, StatusReport};
use crate::state::AppState;
use tracing::info;

pub async fn start_project(
    state: &AppState,
    owner_id: &str,
    project_id: &str,
) -> SupervisorResult<StatusReport> {
    let key = ProjectKey::new(owner_id, project_id);
    state.supervisor.start(&key).await
}

pub async fn stop_project(state: &AppState, owner_id: &str, project_id: &str) -> SupervisorResult<()> {
    let key = ProjectKey::new(owner_id, project_id);
    state.supervisor.stop(&key).await
}

/// Stop and forget a project. Its share codes die with it; the files under
/// the returned project's `root_path` are the caller's to delete.
pub async fn remove_project(
    state: &AppState,
    owner_id: &str,
    project_id: &str,
) -> SupervisorResult<Project> {
    let key = ProjectKey::new(owner_id, project_id);
    let project = state.supervisor.remove(&key).await?;
    state.shares.revoke_project(&key);
    info!(project = %key, root = %project.root_path.display(), "project removed, shares revoked");
    Ok(project)
}

pub async fn project_status(
    state: &AppState,
    owner_id: &str,
    project_id: &str,
) -> SupervisorResult<StatusReport> {
    state
        .supervisor
        .status(&ProjectKey::new(owner_id, project_id))
        .await
}

pub async fn running_instance(
    state: &AppState,
    owner_id: &str,
    project_id: &str,
) -> SupervisorResult<Option<InstanceInfo>> {
    state
        .supervisor
        .instance(&ProjectKey::new(owner_id, project_id))
        .await
}

pub async fn stop_all_projects(state: &AppState) {
    state.shutdown().await;
}
