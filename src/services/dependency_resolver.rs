use crate::config::ToolchainConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::models::{LogLevel, ProjectKey};
use crate::services::log_hub::LogHub;
use crate::services::process_manager::{base_command, pump_lines};
use crate::utils::kill_process_tree;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of an installer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    Failed { code: Option<i32>, reason: String },
    /// Killed because the project was stopped, removed or shut down meanwhile.
    Cancelled,
}

impl InstallOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed)
    }
}

/// Recognizes "module not found" failures and installs the missing module.
pub struct DependencyResolver {
    hub: Arc<LogHub>,
    toolchain: ToolchainConfig,
    login_path: bool,
    patterns: Vec<Regex>,
}

impl DependencyResolver {
    pub fn new(hub: Arc<LogHub>, toolchain: ToolchainConfig, login_path: bool) -> SupervisorResult<Self> {
        let patterns = toolchain
            .missing_module_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    SupervisorError::Config(format!("bad missing-module pattern {:?}: {}", p, e))
                })
            })
            .collect::<SupervisorResult<Vec<_>>>()?;

        Ok(Self {
            hub,
            toolchain,
            login_path,
            patterns,
        })
    }

    /// The installable package named by a "module not found" error, if `text` holds one.
    pub fn detect(&self, text: &str) -> Option<String> {
        self.patterns
            .iter()
            .filter_map(|re| re.captures(text))
            .filter_map(|caps| caps.get(1))
            .find_map(|m| package_name(m.as_str()))
    }

    /// Whole-project install run before a manual start.
    pub async fn install_all(&self, key: &ProjectKey, root: &Path, cancel: &CancellationToken) -> InstallOutcome {
        let args = self.toolchain.install_args.clone();
        self.run_installer(key, root, &args, ("[NPM]", "[NPM]"), LogLevel::Warn, cancel)
            .await
    }

    /// Install exactly `module`, streaming installer output to the project log.
    pub async fn install_module(
        &self,
        key: &ProjectKey,
        root: &Path,
        module: &str,
        cancel: &CancellationToken,
    ) -> InstallOutcome {
        let mut args = self.toolchain.install_module_args.clone();
        args.push(module.to_string());
        let outcome = self
            .run_installer(
                key,
                root,
                &args,
                ("[INSTALL]", "[INSTALL ERROR]"),
                LogLevel::Error,
                cancel,
            )
            .await;

        match &outcome {
            InstallOutcome::Installed => info!(project = %key, module, "missing module installed"),
            InstallOutcome::Failed { code, .. } => {
                warn!(project = %key, module, ?code, "missing module install failed")
            }
            InstallOutcome::Cancelled => info!(project = %key, module, "missing module install cancelled"),
        }
        outcome
    }

    async fn run_installer(
        &self,
        key: &ProjectKey,
        root: &Path,
        args: &[String],
        (out_prefix, err_prefix): (&'static str, &'static str),
        err_level: LogLevel,
        cancel: &CancellationToken,
    ) -> InstallOutcome {
        if cancel.is_cancelled() {
            return InstallOutcome::Cancelled;
        }

        let mut command = base_command(&self.toolchain.installer, root, self.login_path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return InstallOutcome::Failed {
                    code: None,
                    reason: format!("could not run {}: {}", self.toolchain.installer, e),
                }
            }
        };

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let hub = self.hub.clone();
            let key = key.clone();
            readers.push(tokio::spawn(pump_lines(stdout, move |line| {
                hub.info(&key, format!("{} {}", out_prefix, line));
            })));
        }
        if let Some(stderr) = child.stderr.take() {
            let hub = self.hub.clone();
            let key = key.clone();
            readers.push(tokio::spawn(pump_lines(stderr, move |line| {
                hub.append(&key, format!("{} {}", err_prefix, line), err_level);
            })));
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                // Nothing the installer prints from here on belongs in the log.
                for reader in &readers {
                    reader.abort();
                }
                if let Some(pid) = child.id() {
                    kill_process_tree(pid).await;
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                debug!(project = %key, installer = %self.toolchain.installer, "installer killed");
                return InstallOutcome::Cancelled;
            }
        };
        for reader in readers {
            let _ = reader.await;
        }

        match status {
            Ok(status) if status.success() => InstallOutcome::Installed,
            Ok(status) => InstallOutcome::Failed {
                code: status.code(),
                reason: format!("{} exited with {}", self.toolchain.installer, status),
            },
            Err(e) => InstallOutcome::Failed {
                code: None,
                reason: format!("waiting for {} failed: {}", self.toolchain.installer, e),
            },
        }
    }
}

/// Reduce an import specifier to the package that provides it.
///
/// Relative/absolute paths and `node:` builtins aren't installable.
pub fn package_name(specifier: &str) -> Option<String> {
    let trimmed = specifier.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('.')
        || trimmed.starts_with('/')
        || trimmed.contains('\\')
        || trimmed.starts_with("node:")
    {
        return None;
    }

    let mut parts = trimmed.split('/');
    let first = parts.next()?;
    if first.starts_with('@') {
        let name = parts.next().filter(|n| !n.is_empty())?;
        Some(format!("{}/{}", first, name))
    } else {
        Some(first.to_string())
    }
}
