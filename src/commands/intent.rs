//! Single entry point for the messaging front-end.
//!
//! Every intent produces an [`IntentResult`]; errors are folded into
//! `ok: false` plus a message instead of being returned.

use crate::commands::{console, process};
use crate::models::{Intent, IntentKind, IntentResult, ProjectKey, ProjectStatus};
use crate::state::AppState;
use tracing::{debug, warn};

pub async fn handle_intent(state: &AppState, intent: Intent) -> IntentResult {
    debug!(kind = ?intent.kind, owner = %intent.owner_id, project = %intent.project_id, "intent received");

    let owner = intent.owner_id.as_str();
    let project = intent.project_id.as_str();

    let result = match intent.kind {
        IntentKind::Start => match process::start_project(state, owner, project).await {
            Ok(report) => IntentResult::success(Some(report.status)),
            Err(e) => IntentResult::failure(current_status(state, owner, project).await, e),
        },
        IntentKind::Stop => match process::stop_project(state, owner, project).await {
            Ok(()) => IntentResult::success(Some(ProjectStatus::Stopped)),
            Err(e) => IntentResult::failure(current_status(state, owner, project).await, e),
        },
        IntentKind::Remove => match process::remove_project(state, owner, project).await {
            Ok(removed) => IntentResult {
                root_path: Some(removed.root_path),
                ..IntentResult::success(None)
            },
            Err(e) => IntentResult::failure(None, e),
        },
        IntentKind::Console => match console::get_console(state, owner, project).await {
            Ok(view) => IntentResult {
                logs_tail: Some(view.logs),
                ..IntentResult::success(Some(view.status.status))
            },
            Err(e) => IntentResult::failure(None, e),
        },
        IntentKind::Share => match console::share_console(state, owner, project).await {
            Ok(code) => IntentResult {
                share_code: Some(code),
                ..IntentResult::success(current_status(state, owner, project).await)
            },
            Err(e) => IntentResult::failure(None, e),
        },
        // The archive itself is built outside the core.
        IntentKind::Backup => {
            let key = ProjectKey::new(owner, project);
            match state.supervisor.project(&key).await {
                Ok(found) => IntentResult {
                    root_path: Some(found.root_path),
                    ..IntentResult::success(Some(found.status))
                },
                Err(e) => IntentResult::failure(None, e),
            }
        }
    };

    if let Some(error) = &result.error {
        warn!(kind = ?intent.kind, owner, project, %error, "intent rejected");
    }
    result
}

async fn current_status(state: &AppState, owner_id: &str, project_id: &str) -> Option<ProjectStatus> {
    process::project_status(state, owner_id, project_id)
        .await
        .ok()
        .map(|report| report.status)
}
