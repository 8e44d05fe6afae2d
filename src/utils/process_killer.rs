use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[cfg(not(target_os = "windows"))]
use nix::sys::signal::{kill, Signal};
#[cfg(not(target_os = "windows"))]
use nix::unistd::Pid;

/// Grace period between TERM and KILL.
const TERM_GRACE: Duration = Duration::from_millis(50);

#[cfg(not(target_os = "windows"))]
async fn get_child_pids(pid: u32) -> Vec<u32> {
    let output = Command::new("pgrep")
        .args(["-P", &pid.to_string()])
        .output()
        .await;

    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Terminate `pid` and everything below it.
///
/// Best effort: a process that is already gone counts as killed, so this
/// never fails.
#[cfg(not(target_os = "windows"))]
pub async fn kill_process_tree(pid: u32) {
    // Collect the whole tree first; children get reparented once the parent dies.
    let mut pids = vec![pid];
    let mut cursor = 0;
    while cursor < pids.len() {
        let children = get_child_pids(pids[cursor]).await;
        pids.extend(children);
        cursor += 1;
    }

    // Leaves first. ESRCH just means it already exited.
    for target in pids.iter().rev() {
        let _ = kill(Pid::from_raw(*target as i32), Signal::SIGTERM);
    }

    tokio::time::sleep(TERM_GRACE).await;

    for target in pids.iter().rev() {
        let _ = kill(Pid::from_raw(*target as i32), Signal::SIGKILL);
    }

    debug!(pid, tree = pids.len(), "process tree terminated");
}

#[cfg(target_os = "windows")]
pub async fn kill_process_tree(pid: u32) {
    const CREATE_NO_WINDOW: u32 = 0x08000000;

    let mut kill_command = Command::new("taskkill");
    kill_command
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .creation_flags(CREATE_NO_WINDOW);

    let _ = kill_command.output().await;
    debug!(pid, "process tree terminated");
}

#[cfg(all(test, not(target_os = "windows")))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kill_missing_pid_is_not_an_error() {
        // Far above any default pid_max.
        kill_process_tree(4_000_000).await;
    }

    #[tokio::test]
    async fn test_kill_tree_terminates_child() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30 & wait"])
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        kill_process_tree(pid).await;

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should be reaped")
            .unwrap();
        assert!(!status.success());
    }
}
