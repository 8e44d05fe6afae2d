#![cfg(not(target_os = "windows"))]

use std::path::Path;
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

/// The user's login-shell PATH, so `node`/`npm` from version managers resolve
/// the same way they do in a terminal.
pub static USER_PATH: Lazy<String> = Lazy::new(|| {
    get_user_shell_path().unwrap_or_else(|e| {
        warn!("could not resolve login PATH ({}), using process PATH", e);
        std::env::var("PATH").unwrap_or_default()
    })
});

fn get_user_shell_path() -> Result<String, String> {
    // Non-interactive login shell: reads the profile files without prompting.
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    let output = Command::new(&shell)
        .args(["-l", "-c", "echo $PATH"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    if let Ok(output) = output {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() && path.contains('/') {
                debug!(shell = %shell, "PATH taken from login shell");
                return Ok(path);
            }
        }
    }

    let home = std::env::var("HOME").map_err(|_| "HOME is not set".to_string())?;
    let system_path = std::env::var("PATH").unwrap_or_default();

    let common_paths = vec![
        format!("{}/bin", home),
        format!("{}/.local/bin", home),
        format!("{}/.fnm/current/bin", home),
        format!("{}/.volta/bin", home),
        format!("{}/.npm-global/bin", home),
        "/opt/homebrew/bin".to_string(),
        "/usr/local/bin".to_string(),
        "/usr/bin".to_string(),
        "/bin".to_string(),
    ];

    let mut paths: Vec<String> = common_paths
        .into_iter()
        .filter(|p| Path::new(p).exists())
        .collect();

    // nvm keeps one bin dir per installed node version.
    let nvm_dir = format!("{}/.nvm/versions/node", home);
    if let Ok(entries) = std::fs::read_dir(&nvm_dir) {
        for entry in entries.flatten() {
            let bin_path = entry.path().join("bin");
            if bin_path.exists() {
                paths.insert(0, bin_path.to_string_lossy().to_string());
            }
        }
    }

    for p in system_path.split(':') {
        if !p.is_empty() && !paths.iter().any(|existing| existing == p) {
            paths.push(p.to_string());
        }
    }

    debug!("PATH assembled from well-known locations");
    Ok(paths.join(":"))
}

/// Look `program` up along `path_var` (a `:`-separated PATH value).
pub fn resolve_program_in(path_var: &str, program: &str) -> Option<String> {
    if program.contains('/') {
        return Path::new(program)
            .is_file()
            .then(|| program.to_string());
    }
    path_var
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| candidate.is_file())
        .map(|candidate| candidate.to_string_lossy().to_string())
}

pub fn resolve_program_in_user_path(program: &str) -> Option<String> {
    resolve_program_in(&USER_PATH, program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_program_in() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("mytool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();

        let path_var = format!("/nonexistent:{}", dir.path().display());
        assert_eq!(
            resolve_program_in(&path_var, "mytool"),
            Some(tool.to_string_lossy().to_string())
        );
        assert_eq!(resolve_program_in(&path_var, "othertool"), None);
    }
}
