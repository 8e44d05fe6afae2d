//! Supervisor configuration.
//!
//! Loaded from JSON. Every field has a default, so an empty object (or no
//! file at all) yields a working node/npm setup.

use crate::error::{SupervisorError, SupervisorResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Ring buffer capacity per project.
    pub log_capacity: usize,
    /// Per-subscriber queue length; a subscriber that falls this far behind is dropped.
    pub subscriber_queue: usize,
    pub restart_delay_ms: u64,
    /// Pause between a successful module install and the restart.
    pub settle_delay_ms: u64,
    pub stop_timeout_ms: u64,
    /// How long to wait for the stderr reader after exit before deciding crash vs. missing module.
    pub drain_timeout_ms: u64,
    pub restart_on_clean_exit: bool,
    pub console_tail: usize,
    pub share_ttl_secs: i64,
    /// Hand spawned commands the user's login-shell PATH (unix only).
    pub login_path: bool,
    pub toolchain: ToolchainConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            log_capacity: 1000,
            subscriber_queue: 256,
            restart_delay_ms: 5000,
            settle_delay_ms: 2000,
            stop_timeout_ms: 3000,
            drain_timeout_ms: 500,
            restart_on_clean_exit: false,
            console_tail: 20,
            share_ttl_secs: 24 * 60 * 60,
            login_path: cfg!(not(target_os = "windows")),
            toolchain: ToolchainConfig::default(),
        }
    }
}

/// How projects are run and how their dependencies are installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    pub installer: String,
    /// Whole-project install, run at start when a descriptor exists.
    pub install_args: Vec<String>,
    /// Single-module install; the module name is appended.
    pub install_module_args: Vec<String>,
    pub manifest_file: String,
    pub descriptor_files: Vec<String>,
    /// Regexes whose first capture group names the missing module.
    pub missing_module_patterns: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            interpreter: "node".to_string(),
            interpreter_args: Vec::new(),
            installer: default_installer(),
            install_args: vec!["install".to_string()],
            install_module_args: vec!["install".to_string()],
            manifest_file: "package.json".to_string(),
            descriptor_files: vec!["package.json".to_string(), "requirements.txt".to_string()],
            missing_module_patterns: vec![r#"Cannot find module ['"]([^'"]+)['"]"#.to_string()],
        }
    }
}

#[cfg(target_os = "windows")]
fn default_installer() -> String {
    "npm.cmd".to_string()
}

#[cfg(not(target_os = "windows"))]
fn default_installer() -> String {
    "npm".to_string()
}

impl SupervisorConfig {
    /// Load from `path`, or from the default location when `None`.
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> SupervisorResult<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(SupervisorError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// `<config_dir>/runkeeper/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join("runkeeper").join("config.json"))
    }

    pub fn validate(&self) -> SupervisorResult<()> {
        if self.log_capacity == 0 {
            return Err(SupervisorError::Config("log_capacity must be > 0".to_string()));
        }
        if self.subscriber_queue == 0 {
            return Err(SupervisorError::Config(
                "subscriber_queue must be > 0".to_string(),
            ));
        }
        if self.toolchain.interpreter.trim().is_empty() {
            return Err(SupervisorError::Config("interpreter must be set".to_string()));
        }
        if self.share_ttl_secs <= 0 {
            return Err(SupervisorError::Config("share_ttl_secs must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SupervisorConfig =
            serde_json::from_str(r#"{"restart_delay_ms": 10, "toolchain": {"installer": "pnpm"}}"#)
                .unwrap();
        assert_eq!(config.restart_delay_ms, 10);
        assert_eq!(config.log_capacity, 1000);
        assert_eq!(config.toolchain.installer, "pnpm");
        assert_eq!(config.toolchain.interpreter, "node");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SupervisorConfig::load(Some(&dir.path().join("nope.json")));
        assert!(matches!(result, Err(SupervisorError::Config(_))));
    }

    #[test]
    fn test_load_rejects_zero_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"log_capacity": 0}"#).unwrap();
        assert!(SupervisorConfig::load(Some(&path)).is_err());
    }
}
