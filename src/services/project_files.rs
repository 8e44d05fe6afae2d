use crate::config::ToolchainConfig;
use crate::error::SupervisorResult;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub struct ProjectFiles;

impl ProjectFiles {
    /// Whether the project ships a manifest or dependency list worth installing from.
    pub fn has_descriptor(root: &Path, toolchain: &ToolchainConfig) -> bool {
        toolchain
            .descriptor_files
            .iter()
            .any(|name| root.join(name).is_file())
    }

    /// Write a minimal manifest pointing at `main_file`.
    pub fn write_default_manifest(
        root: &Path,
        project_id: &str,
        main_file: &str,
        toolchain: &ToolchainConfig,
    ) -> SupervisorResult<PathBuf> {
        let manifest = json!({
            "name": project_id,
            "version": "1.0.0",
            "description": "Auto-generated project",
            "main": main_file,
            "scripts": {
                "start": format!("{} {}", toolchain.interpreter, main_file),
            },
        });

        let path = root.join(&toolchain.manifest_file);
        fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
        Ok(path)
    }

    /// Files under `root`, relative and sorted, skipping installed modules.
    pub fn list_files(root: &Path, max_depth: usize) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(root)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|e| e.file_name() != "node_modules")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(root)
                    .ok()
                    .map(|p| p.to_string_lossy().to_string())
            })
            .collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = ToolchainConfig::default();
        assert!(!ProjectFiles::has_descriptor(dir.path(), &toolchain));

        let path =
            ProjectFiles::write_default_manifest(dir.path(), "project_1", "bot.js", &toolchain)
                .unwrap();
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(manifest["name"], "project_1");
        assert_eq!(manifest["main"], "bot.js");
        assert_eq!(manifest["scripts"]["start"], "node bot.js");
        assert!(ProjectFiles::has_descriptor(dir.path(), &toolchain));
    }

    #[test]
    fn test_requirements_counts_as_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "left-pad\n").unwrap();
        assert!(ProjectFiles::has_descriptor(dir.path(), &ToolchainConfig::default()));
    }

    #[test]
    fn test_list_files_skips_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bot.js"), "").unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib").join("util.js"), "").unwrap();
        fs::create_dir_all(dir.path().join("node_modules").join("left-pad")).unwrap();
        fs::write(dir.path().join("node_modules").join("left-pad").join("index.js"), "").unwrap();

        let files = ProjectFiles::list_files(dir.path(), 4);
        let expected_lib = Path::new("lib").join("util.js").to_string_lossy().to_string();
        assert_eq!(files, vec!["bot.js".to_string(), expected_lib]);
    }
}
