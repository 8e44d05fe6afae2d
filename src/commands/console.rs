use crate::error::SupervisorResult;
use crate::models::{ConsoleView, ProjectKey};
use crate::services::{Subscription, SubscriptionId};
use crate::state::AppState;

async fn console_for(state: &AppState, key: ProjectKey, lines: usize) -> SupervisorResult<ConsoleView> {
    let status = state.supervisor.status(&key).await?;
    let logs = state.supervisor.tail(&key, lines).await?;
    Ok(ConsoleView { key, status, logs })
}

/// Status plus the last `console_tail` log lines.
pub async fn get_console(state: &AppState, owner_id: &str, project_id: &str) -> SupervisorResult<ConsoleView> {
    let lines = state.config().console_tail;
    console_for(state, ProjectKey::new(owner_id, project_id), lines).await
}

pub async fn get_logs(
    state: &AppState,
    owner_id: &str,
    project_id: &str,
    lines: usize,
) -> SupervisorResult<ConsoleView> {
    console_for(state, ProjectKey::new(owner_id, project_id), lines).await
}

/// Live log stream; the caller owns the subscription.
pub async fn subscribe_console(
    state: &AppState,
    owner_id: &str,
    project_id: &str,
) -> SupervisorResult<Subscription> {
    state
        .supervisor
        .subscribe(&ProjectKey::new(owner_id, project_id))
        .await
}

pub fn unsubscribe_console(state: &AppState, id: SubscriptionId) {
    state.supervisor.unsubscribe(id);
}

pub async fn share_console(state: &AppState, owner_id: &str, project_id: &str) -> SupervisorResult<String> {
    let key = ProjectKey::new(owner_id, project_id);
    // Only existing projects can be shared.
    state.supervisor.status(&key).await?;
    Ok(state.shares.issue(&key))
}

/// Read-only console behind a share code, regardless of who asks.
pub async fn view_shared_console(state: &AppState, code: &str) -> SupervisorResult<ConsoleView> {
    let key = state.shares.resolve(code)?;
    let lines = state.config().console_tail;
    console_for(state, key, lines).await
}

pub async fn subscribe_shared_console(state: &AppState, code: &str) -> SupervisorResult<Subscription> {
    let key = state.shares.resolve(code)?;
    state.supervisor.subscribe(&key).await
}
