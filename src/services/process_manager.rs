use crate::config::{SupervisorConfig, ToolchainConfig};
use crate::models::{InstanceInfo, Project, ProjectKey};
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::log_hub::LogHub;
use crate::utils::kill_process_tree;
use chrono::Utc;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(not(target_os = "windows"))]
use crate::utils::USER_PATH;

/// Why an instance stopped running. Exactly one per instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The program exited on its own.
    Exited(Option<i32>),
    /// Killed on request (manual stop, removal, shutdown).
    Stopped,
    /// Killed because stderr reported this module missing.
    MissingModule(String),
    /// The monitor itself failed; the child is gone either way.
    Fault(String),
}

/// Handle to a live child. Owned by the supervisor slot of its project.
pub struct RunningInstance {
    pub info: InstanceInfo,
    stop_tx: oneshot::Sender<oneshot::Sender<()>>,
}

impl RunningInstance {
    /// Kill the instance and wait (up to `timeout`) until it has been reaped.
    /// An instance that already exited counts as stopped.
    pub async fn terminate(self, timeout: Duration) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop_tx.send(ack_tx).is_err() {
            return;
        }
        if tokio::time::timeout(timeout, ack_rx).await.is_err() {
            warn!(
                project = %self.info.key,
                pid = ?self.info.pid,
                "instance did not confirm termination in time"
            );
        }
    }
}

/// Build a command for `program` running in `cwd`.
pub(crate) fn base_command(program: &str, cwd: &Path, login_path: bool) -> Command {
    let mut command = Command::new(program);
    command.current_dir(cwd);

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        let _ = login_path;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    #[cfg(not(target_os = "windows"))]
    if login_path {
        command.env("PATH", &*USER_PATH);
    }

    command
}

/// Feed every line of `reader` to `on_line`. Invalid UTF-8 is replaced, not fatal.
pub(crate) async fn pump_lines<R>(reader: R, mut on_line: impl FnMut(String))
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(['\n', '\r']).to_string());
            }
            Err(e) => {
                debug!("output reader stopped: {}", e);
                break;
            }
        }
    }
}

/// Spawns project entry points and watches them until they end.
pub struct ProcessManager {
    hub: Arc<LogHub>,
    resolver: Arc<DependencyResolver>,
    toolchain: ToolchainConfig,
    login_path: bool,
    drain_timeout: Duration,
    kill_timeout: Duration,
}

impl ProcessManager {
    pub fn new(hub: Arc<LogHub>, resolver: Arc<DependencyResolver>, config: &SupervisorConfig) -> Self {
        Self {
            hub,
            resolver,
            toolchain: config.toolchain.clone(),
            login_path: config.login_path,
            drain_timeout: config.drain_timeout(),
            kill_timeout: config.stop_timeout(),
        }
    }

    /// Launch `project`'s entry point with stdout/stderr captured into the log hub.
    ///
    /// The returned task resolves with the instance's [`Termination`] once
    /// the child is gone and its output drained.
    pub fn spawn(
        &self,
        project: &Project,
        generation: u64,
    ) -> std::io::Result<(RunningInstance, JoinHandle<Termination>)> {
        let mut command = base_command(&self.toolchain.interpreter, &project.root_path, self.login_path);
        command
            .args(&self.toolchain.interpreter_args)
            .arg(&project.main_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let pid = child.id();
        let key = project.key.clone();

        info!(project = %key, pid = ?pid, generation, "instance spawned");

        let mut readers = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            let hub = self.hub.clone();
            let key = key.clone();
            readers.push(tokio::spawn(pump_lines(stdout, move |line| {
                hub.info(&key, line);
            })));
        }

        // Capacity 1: only the first missing module of an instance matters.
        let (missing_tx, missing_rx) = mpsc::channel(1);
        if let Some(stderr) = child.stderr.take() {
            let hub = self.hub.clone();
            let resolver = self.resolver.clone();
            let key = key.clone();
            readers.push(tokio::spawn(pump_lines(stderr, move |line| {
                let module = resolver.detect(&line);
                hub.error(&key, line);
                if let Some(module) = module {
                    let _ = missing_tx.try_send(module);
                }
            })));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = InstanceMonitor {
            hub: self.hub.clone(),
            key: key.clone(),
            pid,
            drain_timeout: self.drain_timeout,
            kill_timeout: self.kill_timeout,
        };
        let handle = tokio::spawn(monitor.run(child, readers, missing_rx, stop_rx));

        let instance = RunningInstance {
            info: InstanceInfo {
                key,
                generation,
                pid,
                started_at: Utc::now(),
            },
            stop_tx,
        };
        Ok((instance, handle))
    }
}

/// Exit observer: owns the child and decides how it ended.
struct InstanceMonitor {
    hub: Arc<LogHub>,
    key: ProjectKey,
    pid: Option<u32>,
    drain_timeout: Duration,
    kill_timeout: Duration,
}

impl InstanceMonitor {
    async fn run(
        self,
        mut child: Child,
        readers: Vec<JoinHandle<()>>,
        mut missing_rx: mpsc::Receiver<String>,
        mut stop_rx: oneshot::Receiver<oneshot::Sender<()>>,
    ) -> Termination {
        let mut stop_open = true;

        let termination = loop {
            tokio::select! {
                request = &mut stop_rx, if stop_open => match request {
                    Ok(ack) => {
                        self.kill(&mut child).await;
                        self.drain(readers).await;
                        let _ = ack.send(());
                        return Termination::Stopped;
                    }
                    // The handle went away without asking; keep watching the child.
                    Err(_) => stop_open = false,
                },
                Some(module) = missing_rx.recv() => {
                    self.note_missing(&module);
                    self.kill(&mut child).await;
                    break Termination::MissingModule(module);
                }
                status = child.wait() => {
                    // A missing-module line written right before exit must still win:
                    // wait for the stderr observer to either report one or hang up.
                    let pending = tokio::time::timeout(self.drain_timeout, missing_rx.recv()).await;
                    if let Ok(Some(module)) = pending {
                        self.note_missing(&module);
                        break Termination::MissingModule(module);
                    }
                    break match status {
                        Ok(status) => Termination::Exited(status.code()),
                        Err(e) => Termination::Fault(format!("waiting for process failed: {}", e)),
                    };
                }
            }
        };

        self.drain(readers).await;
        termination
    }

    fn note_missing(&self, module: &str) {
        warn!(project = %self.key, module, "missing module detected");
        self.hub.warn(&self.key, format!("Detected missing module: {}", module));
        self.hub.info(&self.key, format!("Auto-installing {}...", module));
    }

    async fn kill(&self, child: &mut Child) {
        if let Some(pid) = self.pid {
            kill_process_tree(pid).await;
        }
        // Already-exited children make this fail; that's fine.
        let _ = child.start_kill();
        if tokio::time::timeout(self.kill_timeout, child.wait()).await.is_err() {
            warn!(project = %self.key, pid = ?self.pid, "child not reaped after kill");
        }
    }

    async fn drain(&self, readers: Vec<JoinHandle<()>>) {
        for reader in readers {
            if tokio::time::timeout(self.drain_timeout, reader).await.is_err() {
                debug!(project = %self.key, "output reader still open after exit");
            }
        }
    }
}
