//! Per-project lifecycle state machine and the registry that owns it.
//!
//! Every project lives in one [`Slot`] behind a single async mutex. All
//! spawns happen while that mutex is held and only after re-checking the
//! slot's phase and generation, which is what keeps a project at one
//! instance: delayed restarts and post-install restarts carry the generation
//! they were scheduled under and quietly give up if anything bumped it.
//! A bump also cancels the slot's in-flight dependency install, which kills
//! the installer process.

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::models::{
    AnalyticsReport, InstanceInfo, LifecycleEvent, LogEntry, Project, ProjectCreated, ProjectKey,
    ProjectStatus, ProjectSummary, StatusReport,
};
use crate::services::analytics::AnalyticsCounter;
use crate::services::dependency_resolver::{DependencyResolver, InstallOutcome};
use crate::services::log_hub::{LogHub, Subscription, SubscriptionId};
use crate::services::process_manager::{ProcessManager, RunningInstance, Termination};
use crate::services::project_files::ProjectFiles;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    /// Manual start: manifest bootstrap and dependency install before the spawn.
    Starting,
    Running,
    Stopping,
    /// Crashed; an automatic restart is scheduled.
    RestartPending,
    /// Killed for a missing module; install and restart in flight.
    Resolving,
}

struct Slot {
    project: Project,
    phase: Phase,
    instance: Option<RunningInstance>,
    /// Bumped on every transition that invalidates scheduled work.
    generation: u64,
    /// Set by the first spawn of a run, cleared by a manual stop.
    start_notified: bool,
    /// Install belonging to the current `Starting`/`Resolving` phase.
    install: Option<CancellationToken>,
}

impl Slot {
    fn new(project: Project) -> Self {
        Self {
            project,
            phase: Phase::Stopped,
            instance: None,
            generation: 0,
            start_notified: false,
            install: None,
        }
    }

    fn bump(&mut self) -> u64 {
        if let Some(install) = self.install.take() {
            install.cancel();
        }
        self.generation += 1;
        self.generation
    }

    /// Token for an install under the current generation. The next bump cancels it.
    fn begin_install(&mut self) -> CancellationToken {
        let token = CancellationToken::new();
        self.install = Some(token.clone());
        token
    }

    fn report(&self) -> StatusReport {
        StatusReport {
            status: self.project.status,
            last_started_at: self.project.last_started_at,
        }
    }

    fn mark_stopped(&mut self) {
        self.phase = Phase::Stopped;
        self.project.status = ProjectStatus::Stopped;
    }
}

enum SpawnOutcome {
    Spawned(StatusReport),
    Superseded,
    Failed(String),
}

struct Inner {
    config: SupervisorConfig,
    hub: Arc<LogHub>,
    analytics: Arc<AnalyticsCounter>,
    resolver: Arc<DependencyResolver>,
    processes: ProcessManager,
    slots: Mutex<HashMap<ProjectKey, Slot>>,
    events: broadcast::Sender<LifecycleEvent>,
    /// Manual-start installs and missing-module resolutions.
    installs: TaskTracker,
    shutting_down: AtomicBool,
}

/// Registry of supervised projects keyed by `(owner_id, project_id)`.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        hub: Arc<LogHub>,
        analytics: Arc<AnalyticsCounter>,
    ) -> SupervisorResult<Self> {
        config.validate()?;
        let resolver = Arc::new(DependencyResolver::new(
            hub.clone(),
            config.toolchain.clone(),
            config.login_path,
        )?);
        let processes = ProcessManager::new(hub.clone(), resolver.clone(), &config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                hub,
                analytics,
                resolver,
                processes,
                slots: Mutex::new(HashMap::new()),
                events,
                installs: TaskTracker::new(),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Lifecycle notifications for every project.
    pub fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Register an uploaded project in the `Stopped` state.
    pub async fn register(&self, created: ProjectCreated) -> SupervisorResult<Project> {
        let project = Project::new(created);
        let mut slots = self.inner.slots.lock().await;
        if slots.contains_key(&project.key) {
            return Err(SupervisorError::AlreadyRegistered(project.key));
        }
        info!(project = %project.key, main = %project.main_file, "project registered");
        self.inner.hub.open(&project.key);
        slots.insert(project.key.clone(), Slot::new(project.clone()));
        Ok(project)
    }

    pub async fn start(&self, key: &ProjectKey) -> SupervisorResult<StatusReport> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShuttingDown);
        }

        let (project, generation, cancel) = {
            let mut slots = self.inner.slots.lock().await;
            // Shutdown may have swept the slots since the check above.
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                return Err(SupervisorError::ShuttingDown);
            }
            let slot = slots
                .get_mut(key)
                .ok_or_else(|| SupervisorError::NotFound(key.clone()))?;

            match slot.phase {
                // A manual start supersedes a pending crash restart.
                Phase::Stopped | Phase::RestartPending => {}
                _ => return Err(SupervisorError::AlreadyRunning(key.clone())),
            }
            slot.phase = Phase::Starting;
            let generation = slot.bump();
            (slot.project.clone(), generation, slot.begin_install())
        };

        self.inner
            .installs
            .track_future(self.inner.prepare(&project, &cancel))
            .await;

        let mut slots = self.inner.slots.lock().await;
        let slot = slots
            .get_mut(key)
            .ok_or_else(|| SupervisorError::NotFound(key.clone()))?;

        match self.inner.spawn_locked(slot, generation, Phase::Starting) {
            SpawnOutcome::Spawned(report) => Ok(report),
            SpawnOutcome::Superseded => Ok(slot.report()),
            SpawnOutcome::Failed(reason) => Err(SupervisorError::SpawnFailed {
                key: key.clone(),
                reason,
            }),
        }
    }

    /// Kill the running instance. A manual stop never leads to an automatic restart.
    ///
    /// Without a live instance this returns `NotRunning`, but still cancels a
    /// pending crash restart or dependency resolution, killing its installer.
    pub async fn stop(&self, key: &ProjectKey) -> SupervisorResult<()> {
        let (instance, generation) = {
            let mut slots = self.inner.slots.lock().await;
            let slot = slots
                .get_mut(key)
                .ok_or_else(|| SupervisorError::NotFound(key.clone()))?;

            match slot.phase {
                Phase::Running => {}
                Phase::Starting | Phase::RestartPending | Phase::Resolving => {
                    slot.bump();
                    slot.mark_stopped();
                    slot.start_notified = false;
                    self.inner.hub.warn(key, "Pending restart cancelled");
                    info!(project = %key, "pending restart cancelled by stop");
                    return Err(SupervisorError::NotRunning(key.clone()));
                }
                Phase::Stopped | Phase::Stopping => {
                    return Err(SupervisorError::NotRunning(key.clone()))
                }
            }

            let Some(instance) = slot.instance.take() else {
                slot.mark_stopped();
                return Err(SupervisorError::NotRunning(key.clone()));
            };
            slot.phase = Phase::Stopping;
            slot.project.status = ProjectStatus::Stopped;
            slot.start_notified = false;
            (instance, slot.bump())
        };

        instance.terminate(self.inner.config.stop_timeout()).await;

        {
            let mut slots = self.inner.slots.lock().await;
            if let Some(slot) = slots.get_mut(key) {
                if slot.generation == generation && slot.phase == Phase::Stopping {
                    slot.mark_stopped();
                }
            }
        }

        self.inner.hub.warn(key, "Project stopped manually");
        self.inner.emit(LifecycleEvent::Stopped { key: key.clone() });
        info!(project = %key, "project stopped");
        Ok(())
    }

    /// Tear a project down: stop, drop its logs, drop its analytics, forget it.
    /// Deleting `root_path` is left to the caller.
    pub async fn remove(&self, key: &ProjectKey) -> SupervisorResult<Project> {
        let (instance, generation) = {
            let mut slots = self.inner.slots.lock().await;
            let slot = slots
                .get_mut(key)
                .ok_or_else(|| SupervisorError::NotFound(key.clone()))?;
            slot.phase = Phase::Stopping;
            slot.project.status = ProjectStatus::Stopped;
            (slot.instance.take(), slot.bump())
        };

        if let Some(instance) = instance {
            instance.terminate(self.inner.config.stop_timeout()).await;
        }
        self.inner.hub.clear(key);
        self.inner.analytics.remove(key);

        let mut slots = self.inner.slots.lock().await;
        match slots.get(key) {
            Some(slot) if slot.generation == generation => {
                let slot = slots
                    .remove(key)
                    .ok_or_else(|| SupervisorError::NotFound(key.clone()))?;
                info!(project = %key, "project removed");
                Ok(slot.project)
            }
            // Another removal won the race.
            _ => Err(SupervisorError::NotFound(key.clone())),
        }
    }

    pub async fn status(&self, key: &ProjectKey) -> SupervisorResult<StatusReport> {
        let slots = self.inner.slots.lock().await;
        slots
            .get(key)
            .map(Slot::report)
            .ok_or_else(|| SupervisorError::NotFound(key.clone()))
    }

    pub async fn project(&self, key: &ProjectKey) -> SupervisorResult<Project> {
        let slots = self.inner.slots.lock().await;
        slots
            .get(key)
            .map(|slot| slot.project.clone())
            .ok_or_else(|| SupervisorError::NotFound(key.clone()))
    }

    /// The live instance, if any.
    pub async fn instance(&self, key: &ProjectKey) -> SupervisorResult<Option<InstanceInfo>> {
        let slots = self.inner.slots.lock().await;
        slots
            .get(key)
            .map(|slot| slot.instance.as_ref().map(|i| i.info.clone()))
            .ok_or_else(|| SupervisorError::NotFound(key.clone()))
    }

    pub async fn root_path(&self, key: &ProjectKey) -> SupervisorResult<PathBuf> {
        Ok(self.project(key).await?.root_path)
    }

    /// An owner's projects, oldest first.
    pub async fn list_projects(&self, owner_id: &str) -> Vec<ProjectSummary> {
        let slots = self.inner.slots.lock().await;
        let mut projects: Vec<ProjectSummary> = slots
            .values()
            .filter(|slot| slot.project.key.owner_id == owner_id)
            .map(|slot| ProjectSummary::from(&slot.project))
            .collect();
        projects.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.project_id.cmp(&b.project_id))
        });
        projects
    }

    pub async fn running_count(&self, owner_id: &str) -> usize {
        let slots = self.inner.slots.lock().await;
        slots
            .values()
            .filter(|slot| slot.project.key.owner_id == owner_id && slot.project.is_running())
            .count()
    }

    pub async fn subscribe(&self, key: &ProjectKey) -> SupervisorResult<Subscription> {
        self.ensure_known(key).await?;
        Ok(self.inner.hub.subscribe(key))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.hub.unsubscribe(id);
    }

    pub async fn tail(&self, key: &ProjectKey, n: usize) -> SupervisorResult<Vec<LogEntry>> {
        self.ensure_known(key).await?;
        Ok(self.inner.hub.tail(key, n))
    }

    pub async fn analytics(&self, key: &ProjectKey) -> SupervisorResult<AnalyticsReport> {
        self.ensure_known(key).await?;
        Ok(self.inner.analytics.get(key))
    }

    pub async fn owner_analytics(&self, owner_id: &str) -> Vec<(ProjectSummary, AnalyticsReport)> {
        self.list_projects(owner_id)
            .await
            .into_iter()
            .map(|summary| {
                let key = ProjectKey::new(owner_id, summary.project_id.clone());
                let report = self.inner.analytics.get(&key);
                (summary, report)
            })
            .collect()
    }

    /// Kill every live instance and cancel all scheduled work. New starts are refused afterwards.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let instances: Vec<RunningInstance> = {
            let mut slots = self.inner.slots.lock().await;
            slots
                .values_mut()
                .filter_map(|slot| {
                    slot.bump();
                    slot.mark_stopped();
                    slot.instance.take()
                })
                .collect()
        };

        let count = instances.len();
        let timeout = self.inner.config.stop_timeout();
        let handles: Vec<_> = instances
            .into_iter()
            .map(|instance| tokio::spawn(instance.terminate(timeout)))
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "instance termination task failed");
            }
        }

        // Every install was cancelled by the bump above; wait for the installers to die.
        self.inner.installs.close();
        if tokio::time::timeout(timeout, self.inner.installs.wait())
            .await
            .is_err()
        {
            warn!(pending = self.inner.installs.len(), "dependency installs still running at shutdown");
        }

        info!(instances = count, "supervisor shut down");
    }

    async fn ensure_known(&self, key: &ProjectKey) -> SupervisorResult<()> {
        let slots = self.inner.slots.lock().await;
        if slots.contains_key(key) {
            Ok(())
        } else {
            Err(SupervisorError::NotFound(key.clone()))
        }
    }
}

impl Inner {
    fn emit(&self, event: LifecycleEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// One-time manifest bootstrap, or a dependency install when the project ships a descriptor.
    /// Install failures are logged and startup carries on.
    async fn prepare(&self, project: &Project, cancel: &CancellationToken) {
        let key = &project.key;
        let toolchain = &self.config.toolchain;
        let root = &project.root_path;

        if ProjectFiles::has_descriptor(root, toolchain) {
            self.hub.info(key, "Installing dependencies...");
            match self.resolver.install_all(key, root, cancel).await {
                InstallOutcome::Installed => {
                    self.hub.info(key, "Dependencies installed successfully");
                }
                InstallOutcome::Failed { reason, .. } => {
                    warn!(project = %key, %reason, "dependency install failed, starting anyway");
                    self.hub
                        .warn(key, format!("Dependency installation warning: {}", reason));
                    self.hub.info(key, "Continuing with project startup...");
                }
                InstallOutcome::Cancelled => {
                    debug!(project = %key, "start cancelled during dependency install");
                }
            }
        } else {
            self.hub
                .info(key, format!("Initializing {}...", toolchain.manifest_file));
            match ProjectFiles::write_default_manifest(root, &key.project_id, &project.main_file, toolchain) {
                Ok(_) => {
                    self.hub.info(key, format!("{} created", toolchain.manifest_file));
                }
                Err(e) => {
                    warn!(project = %key, error = %e, "manifest bootstrap failed");
                    self.hub.warn(
                        key,
                        format!("Could not create {}: {}", toolchain.manifest_file, e),
                    );
                }
            }
        }
    }

    /// Spawn a fresh instance into `slot`, provided nothing superseded the caller.
    fn spawn_locked(self: &Arc<Self>, slot: &mut Slot, generation: u64, expected: Phase) -> SpawnOutcome {
        let key = slot.project.key.clone();
        if slot.generation != generation || slot.phase != expected || slot.instance.is_some() {
            debug!(project = %key, generation, "spawn superseded");
            return SpawnOutcome::Superseded;
        }
        slot.install = None;

        self.hub
            .info(&key, format!("Starting project: {}", slot.project.main_file));

        let (instance, monitor) = match self.processes.spawn(&slot.project, generation) {
            Ok(spawned) => spawned,
            Err(e) => {
                let reason = e.to_string();
                error!(project = %key, error = %reason, "spawn failed");
                self.hub.error(
                    &key,
                    format!("Failed to start {}: {}", slot.project.main_file, reason),
                );
                slot.mark_stopped();
                self.emit(LifecycleEvent::SpawnFailed {
                    key,
                    reason: reason.clone(),
                });
                return SpawnOutcome::Failed(reason);
            }
        };

        slot.instance = Some(instance);
        slot.phase = Phase::Running;
        slot.project.status = ProjectStatus::Running;
        slot.project.last_started_at = Some(Utc::now());
        self.analytics.record_start(&key);

        if !slot.start_notified {
            slot.start_notified = true;
            self.emit(LifecycleEvent::Started { key: key.clone() });
        }

        let inner = self.clone();
        let watched = key.clone();
        tokio::spawn(async move {
            let termination = match monitor.await {
                Ok(termination) => termination,
                Err(e) => Termination::Fault(format!("instance monitor failed: {}", e)),
            };
            inner.on_terminated(&watched, generation, termination).await;
        });

        SpawnOutcome::Spawned(slot.report())
    }

    async fn on_terminated(self: &Arc<Self>, key: &ProjectKey, generation: u64, termination: Termination) {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get_mut(key) else {
            return;
        };

        let owns_slot = slot
            .instance
            .as_ref()
            .is_some_and(|instance| instance.info.generation == generation);
        if !owns_slot {
            // Stop/remove/shutdown already took this instance.
            debug!(project = %key, generation, ?termination, "termination of released instance");
            return;
        }

        slot.instance = None;
        slot.project.status = ProjectStatus::Stopped;
        let next = slot.bump();

        match termination {
            Termination::Stopped => slot.mark_stopped(),
            Termination::MissingModule(module) => {
                slot.phase = Phase::Resolving;
                let root = slot.project.root_path.clone();
                let cancel = slot.begin_install();
                drop(slots);

                let inner = self.clone();
                let key = key.clone();
                self.installs.spawn(async move {
                    inner.resolve_and_restart(key, next, module, root, cancel).await;
                });
            }
            Termination::Exited(code) => self.after_exit(slot, key, next, code),
            Termination::Fault(reason) => {
                error!(project = %key, %reason, "instance monitor fault");
                self.hub.error(key, format!("Supervisor fault: {}", reason));
                self.after_exit(slot, key, next, None);
            }
        }
    }

    fn after_exit(self: &Arc<Self>, slot: &mut Slot, key: &ProjectKey, generation: u64, code: Option<i32>) {
        let code_text = code.map_or_else(|| "unknown (signal)".to_string(), |c| c.to_string());
        self.hub
            .warn(key, format!("Process exited with code {}", code_text));
        self.emit(LifecycleEvent::Exited {
            key: key.clone(),
            code,
        });

        let crashed = code != Some(0);
        if crashed {
            self.analytics.record_crash(key);
        }
        info!(project = %key, ?code, crashed, "instance exited");

        if !crashed && !self.config.restart_on_clean_exit {
            slot.mark_stopped();
            return;
        }

        slot.phase = Phase::RestartPending;
        let delay = self.config.restart_delay();
        self.emit(LifecycleEvent::RestartScheduled {
            key: key.clone(),
            delay_ms: self.config.restart_delay_ms,
        });

        let inner = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.restart_after_crash(&key, generation).await;
        });
    }

    async fn restart_after_crash(self: &Arc<Self>, key: &ProjectKey, generation: u64) {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        // Still the crash we scheduled for, with no manual start/stop since.
        if slot.generation != generation || slot.phase != Phase::RestartPending {
            debug!(project = %key, "auto-restart skipped, state moved on");
            return;
        }

        self.hub.info(key, "Auto-restarting project...");
        self.spawn_locked(slot, generation, Phase::RestartPending);
    }

    async fn resolve_and_restart(
        self: Arc<Self>,
        key: ProjectKey,
        generation: u64,
        module: String,
        root: PathBuf,
        cancel: CancellationToken,
    ) {
        let outcome = self.resolver.install_module(&key, &root, &module, &cancel).await;

        match outcome {
            InstallOutcome::Installed => {
                {
                    let slots = self.slots.lock().await;
                    let current = slots
                        .get(&key)
                        .is_some_and(|slot| slot.generation == generation && slot.phase == Phase::Resolving);
                    if !current {
                        debug!(project = %key, %module, "install finished after the project moved on");
                        return;
                    }
                    self.hub
                        .info(&key, format!("Successfully installed {}", module));
                    self.hub.info(&key, "Restarting project...");
                    self.emit(LifecycleEvent::DependencyInstalled {
                        key: key.clone(),
                        module,
                    });
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.config.settle_delay()) => {}
                    _ = cancel.cancelled() => {
                        debug!(project = %key, "restart after install cancelled");
                        return;
                    }
                }

                let mut slots = self.slots.lock().await;
                if let Some(slot) = slots.get_mut(&key) {
                    self.spawn_locked(slot, generation, Phase::Resolving);
                }
            }
            InstallOutcome::Failed { code, reason } => {
                let mut slots = self.slots.lock().await;
                match slots.get_mut(&key) {
                    Some(slot) if slot.generation == generation && slot.phase == Phase::Resolving => {
                        slot.mark_stopped();
                        slot.install = None;
                    }
                    _ => {
                        debug!(project = %key, %module, "install failed after the project moved on");
                        return;
                    }
                }
                drop(slots);

                let code_text = code.map_or_else(|| "none".to_string(), |c| c.to_string());
                error!(project = %key, %module, %reason, "dependency resolution failed");
                self.hub.error(
                    &key,
                    format!("Failed to install {}. Exit code: {}", module, code_text),
                );
                self.emit(LifecycleEvent::InstallFailed { key, module, code });
            }
            InstallOutcome::Cancelled => {
                debug!(project = %key, %module, "dependency resolution cancelled");
            }
        }
    }
}
