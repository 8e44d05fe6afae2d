#![allow(dead_code)]

use runkeeper::models::{AnalyticsReport, LifecycleEvent, ProjectCreated, ProjectKey, ProjectStatus};
use runkeeper::services::{AnalyticsCounter, LogHub, Supervisor};
use runkeeper::{SupervisorConfig, ToolchainConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

pub const WAIT: Duration = Duration::from_secs(10);

/// `sh` as the interpreter, an `sh -c` installer, and short delays.
pub fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        restart_delay_ms: 300,
        settle_delay_ms: 100,
        stop_timeout_ms: 2000,
        drain_timeout_ms: 300,
        login_path: false,
        toolchain: ToolchainConfig {
            interpreter: "sh".to_string(),
            installer: "sh".to_string(),
            install_args: vec!["-c".to_string(), "true".to_string()],
            install_module_args: vec![
                "-c".to_string(),
                "echo added $0; touch installed.txt".to_string(),
            ],
            ..ToolchainConfig::default()
        },
        ..SupervisorConfig::default()
    }
}

pub fn supervisor(config: SupervisorConfig) -> Supervisor {
    let hub = Arc::new(LogHub::new(config.log_capacity, config.subscriber_queue));
    let analytics = Arc::new(AnalyticsCounter::new());
    Supervisor::new(config, hub, analytics).unwrap()
}

/// Write `script` as `main.sh` under `root/<id>` and register it.
pub async fn add_project(sup: &Supervisor, root: &Path, id: &str, script: &str) -> ProjectKey {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("main.sh"), script).unwrap();
    let project = sup
        .register(ProjectCreated {
            owner_id: "42".to_string(),
            project_id: id.to_string(),
            main_file: "main.sh".to_string(),
            root_path: dir,
        })
        .await
        .unwrap();
    project.key
}

pub async fn log_lines(sup: &Supervisor, key: &ProjectKey) -> Vec<String> {
    sup.tail(key, 1000)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.text)
        .collect()
}

pub async fn has_log(sup: &Supervisor, key: &ProjectKey, needle: &str) -> bool {
    log_lines(sup, key).await.iter().any(|l| l.contains(needle))
}

pub async fn wait_for_log(sup: &Supervisor, key: &ProjectKey, needle: &str) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if has_log(sup, key, needle).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

pub async fn wait_for_status(sup: &Supervisor, key: &ProjectKey, status: ProjectStatus) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if sup.status(key).await.map(|r| r.status == status).unwrap_or(false) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

pub async fn wait_for_analytics(
    sup: &Supervisor,
    key: &ProjectKey,
    check: impl Fn(&AnalyticsReport) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if sup.analytics(key).await.map(|r| check(&r)).unwrap_or(false) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

pub fn drain_events(events: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut out = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => out.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
