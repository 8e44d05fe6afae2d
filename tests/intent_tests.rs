#![cfg(unix)]

mod common;

use common::test_config;
use runkeeper::commands;
use runkeeper::models::{Intent, IntentKind, ProjectCreated, ProjectStatus};
use runkeeper::{AppState, SupervisorError};
use std::fs;
use std::path::Path;
use std::time::Duration;

async fn state_with_project(root: &Path) -> AppState {
    let state = AppState::new(test_config()).unwrap();
    let dir = root.join("bot");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("main.sh"), "echo hello from bot\nsleep 30\n").unwrap();
    commands::register_project(
        &state,
        ProjectCreated {
            owner_id: "42".to_string(),
            project_id: "bot".to_string(),
            main_file: "main.sh".to_string(),
            root_path: dir,
        },
    )
    .await
    .unwrap();
    state
}

async fn wait_for_console_line(state: &AppState, needle: &str) -> bool {
    for _ in 0..200 {
        let view = commands::get_console(state, "42", "bot").await.unwrap();
        if view.logs.iter().any(|e| e.text.contains(needle)) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn test_start_console_stop_intents() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_project(dir.path()).await;

    let started = commands::handle_intent(&state, Intent::new(IntentKind::Start, "42", "bot")).await;
    assert!(started.ok);
    assert_eq!(started.status, Some(ProjectStatus::Running));

    let again = commands::handle_intent(&state, Intent::new(IntentKind::Start, "42", "bot")).await;
    assert!(!again.ok);
    assert_eq!(again.status, Some(ProjectStatus::Running));
    assert!(again.error.unwrap().contains("already running"));

    assert!(wait_for_console_line(&state, "hello from bot").await);
    let console = commands::handle_intent(&state, Intent::new(IntentKind::Console, "42", "bot")).await;
    assert!(console.ok);
    let tail = console.logs_tail.unwrap();
    assert!(!tail.is_empty() && tail.len() <= 20);

    let stopped = commands::handle_intent(&state, Intent::new(IntentKind::Stop, "42", "bot")).await;
    assert!(stopped.ok);
    assert_eq!(stopped.status, Some(ProjectStatus::Stopped));

    let not_running = commands::handle_intent(&state, Intent::new(IntentKind::Stop, "42", "bot")).await;
    assert!(!not_running.ok);
    assert!(not_running.error.unwrap().contains("not running"));
}

#[tokio::test]
async fn test_console_tail_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_project(dir.path()).await;
    let key = runkeeper::models::ProjectKey::new("42", "bot");
    for i in 0..50 {
        state.hub.info(&key, format!("line {}", i));
    }

    let console = commands::handle_intent(&state, Intent::new(IntentKind::Console, "42", "bot")).await;
    let tail = console.logs_tail.unwrap();
    assert_eq!(tail.len(), 20);
    assert_eq!(tail[0].text, "line 30");
    assert_eq!(tail[19].text, "line 49");
}

#[tokio::test]
async fn test_share_code_opens_console_for_anyone() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_project(dir.path()).await;
    commands::start_project(&state, "42", "bot").await.unwrap();
    assert!(wait_for_console_line(&state, "hello from bot").await);

    let shared = commands::handle_intent(&state, Intent::new(IntentKind::Share, "42", "bot")).await;
    assert!(shared.ok);
    let code = shared.share_code.unwrap();
    assert_eq!(code.len(), 6);

    let view = commands::view_shared_console(&state, &code.to_lowercase()).await.unwrap();
    assert_eq!(view.key.project_id, "bot");
    assert_eq!(view.status.status, ProjectStatus::Running);
    assert!(view.logs.iter().any(|e| e.text == "hello from bot"));

    assert!(matches!(
        commands::view_shared_console(&state, "ZZZZZZ").await,
        Err(SupervisorError::ShareCodeNotFound(_))
    ));

    state.shutdown().await;
}

#[tokio::test]
async fn test_backup_and_remove_hand_out_root_path() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_project(dir.path()).await;
    let root = dir.path().join("bot");

    let backup = commands::handle_intent(&state, Intent::new(IntentKind::Backup, "42", "bot")).await;
    assert!(backup.ok);
    assert_eq!(backup.root_path.as_deref(), Some(root.as_path()));

    let code = commands::share_console(&state, "42", "bot").await.unwrap();
    commands::start_project(&state, "42", "bot").await.unwrap();

    let removed = commands::handle_intent(&state, Intent::new(IntentKind::Remove, "42", "bot")).await;
    assert!(removed.ok);
    assert_eq!(removed.root_path.as_deref(), Some(root.as_path()));

    // Share codes die with the project.
    assert!(matches!(
        commands::view_shared_console(&state, &code).await,
        Err(SupervisorError::ShareCodeNotFound(_))
    ));
    assert!(commands::list_projects(&state, "42").await.is_empty());

    let gone = commands::handle_intent(&state, Intent::new(IntentKind::Console, "42", "bot")).await;
    assert!(!gone.ok);
    assert_eq!(gone.status, None);
}

#[tokio::test]
async fn test_unknown_project_intents_fail() {
    let state = AppState::new(test_config()).unwrap();

    for kind in [
        IntentKind::Start,
        IntentKind::Stop,
        IntentKind::Remove,
        IntentKind::Console,
        IntentKind::Share,
        IntentKind::Backup,
    ] {
        let result = commands::handle_intent(&state, Intent::new(kind, "42", "nope")).await;
        assert!(!result.ok, "{:?} should fail", kind);
        assert!(result.error.unwrap().contains("not found"));
    }
}

#[tokio::test]
async fn test_project_files_listing() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with_project(dir.path()).await;
    fs::create_dir_all(dir.path().join("bot").join("node_modules").join("x")).unwrap();
    fs::write(dir.path().join("bot").join("node_modules").join("x").join("i.js"), "").unwrap();

    let files = commands::list_project_files(&state, "42", "bot").await.unwrap();
    assert_eq!(files, vec!["main.sh".to_string()]);
}

#[test]
fn test_intent_result_json_shape() {
    let result = runkeeper::models::IntentResult::success(Some(ProjectStatus::Running));
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["status"], "running");
    assert!(json.get("logs_tail").is_none());
    assert!(json.get("error").is_none());
}
