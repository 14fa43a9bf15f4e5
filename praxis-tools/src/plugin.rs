//! Tool-plugin discovery backend.
//!
//! Grounded on `tools/src/mcp/discovery.rs`'s design of putting discovery
//! behind a trait so the transport is swappable, generalised per §9's
//! design note: a filesystem backend is the default/only backend
//! implemented here, matching the teacher's actual behaviour, but the
//! seam is explicit so a subprocess or in-process-factory backend could
//! be substituted without touching `Reconcile` (C8).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use praxis_core::{ToolArgument, ToolCharacteristics, ToolDefinition, SyntheticTestCase};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ToolsError;

/// One tool as discovered on disk, before it is registered. Every tool is
/// one file: a JSON manifest (`<name>.tool.json`) alongside an executable
/// (`<name>` or `<name>.sh`) in the same directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolArgument>,
    #[serde(default)]
    pub characteristics: Option<ToolCharacteristics>,
    #[serde(default)]
    pub test_cases: Vec<SyntheticTestCase>,
    pub executable: String,
}

/// Pluggable source of tool definitions. The filesystem backend below is
/// the only implementation shipped; a subprocess registrar or an
/// in-process factory could implement this trait without any change to
/// the lifecycle manager that consumes it.
#[async_trait]
pub trait ToolDiscoveryBackend: Send + Sync {
    /// Scan the backend's source and return every tool currently present,
    /// each paired with the sha256 content hash of its executable.
    async fn discover(&self) -> Result<Vec<(ToolDefinition, String)>, ToolsError>;
}

/// Default backend: scans a directory of `<name>.tool.json` manifests,
/// each naming a sibling executable whose bytes are hashed with `sha2`.
pub struct FilesystemBackend {
    tool_dir: PathBuf,
}

impl FilesystemBackend {
    pub fn new(tool_dir: impl Into<PathBuf>) -> Self {
        Self { tool_dir: tool_dir.into() }
    }

    pub fn tool_dir(&self) -> &Path {
        &self.tool_dir
    }

    fn hash_file(path: &Path) -> Result<String, ToolsError> {
        let bytes = std::fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl ToolDiscoveryBackend for FilesystemBackend {
    async fn discover(&self) -> Result<Vec<(ToolDefinition, String)>, ToolsError> {
        if !self.tool_dir.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(&self.tool_dir).max_depth(1).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if !path.file_name().and_then(|n| n.to_str()).map(|n| n.ends_with(".tool.json")).unwrap_or(false) {
                continue;
            }

            let manifest_bytes = std::fs::read(path)?;
            let manifest: ToolManifest = serde_json::from_slice(&manifest_bytes)?;
            let executable_path = self.tool_dir.join(&manifest.executable);
            if !executable_path.exists() {
                tracing::warn!(
                    "tool manifest {} declares missing executable {}",
                    path.display(),
                    executable_path.display()
                );
                continue;
            }
            let content_hash = Self::hash_file(&executable_path)?;

            let definition = ToolDefinition {
                name: manifest.name,
                description: manifest.description,
                parameters: manifest.parameters,
                characteristics: manifest.characteristics,
                test_cases: manifest.test_cases,
                executable_path: executable_path.to_string_lossy().to_string(),
                content_hash: content_hash.clone(),
            };
            found.push((definition, content_hash));
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tool(dir: &Path, name: &str, script: &str) {
        let exe_path = dir.join(name);
        let mut f = std::fs::File::create(&exe_path).unwrap();
        writeln!(f, "{script}").unwrap();

        let manifest = ToolManifest {
            name: name.to_string(),
            description: format!("the {name} tool"),
            parameters: vec![],
            characteristics: None,
            test_cases: vec![],
            executable: name.to_string(),
        };
        let manifest_path = dir.join(format!("{name}.tool.json"));
        std::fs::write(manifest_path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn discovers_manifests_with_matching_executables() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "echo_tool", "#!/bin/sh\necho hi");

        let backend = FilesystemBackend::new(dir.path());
        let found = backend.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.name, "echo_tool");
        assert!(!found[0].1.is_empty());
    }

    #[tokio::test]
    async fn skips_manifests_whose_executable_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ToolManifest {
            name: "ghost_tool".to_string(),
            description: "no binary".to_string(),
            parameters: vec![],
            characteristics: None,
            test_cases: vec![],
            executable: "ghost_bin".to_string(),
        };
        std::fs::write(dir.path().join("ghost_tool.tool.json"), serde_json::to_vec(&manifest).unwrap()).unwrap();

        let backend = FilesystemBackend::new(dir.path());
        let found = backend.discover().await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn content_hash_changes_when_executable_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "versioned_tool", "v1");
        let backend = FilesystemBackend::new(dir.path());
        let first = backend.discover().await.unwrap();

        write_tool(dir.path(), "versioned_tool", "v2 with different content");
        let second = backend.discover().await.unwrap();

        assert_ne!(first[0].1, second[0].1);
    }
}
