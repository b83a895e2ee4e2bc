//! Reads plugin manifests and modules off the local filesystem.

use std::path::PathBuf;

use preflight_core::{CoreError, Plugin, PluginManifest};

use crate::error::SandboxError;

const MANIFEST_FILE_NAME: &str = "plugin.yaml";

/// One entry discovered by `list_plugins`: the plugin's directory name
/// alongside its parsed manifest, in the order the directory read returned
/// them (§11.2) — callers that want a stable order sort by `dir_name`
/// themselves.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub dir_name: String,
    pub manifest: PluginManifest,
}

/// Loads plugins from immediate subdirectories of a base directory, each
/// expected to contain a `plugin.yaml` manifest and the module file it names.
pub struct Loader {
    base_dir: PathBuf,
}

impl Loader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn plugin_dir(&self, plugin_dir: &str) -> PathBuf {
        self.base_dir.join(plugin_dir)
    }

    /// Reads and validates `<base>/<plugin_dir>/plugin.yaml`.
    ///
    /// Distinguishes two absent-file shapes at the error-kind level: a
    /// missing `plugin_dir` itself is "plugin not found" (the directory the
    /// caller asked for doesn't exist at all), while an existing directory
    /// lacking `plugin.yaml` is the narrower "plugin manifest not found".
    pub fn load_manifest(&self, plugin_dir: &str) -> Result<PluginManifest, SandboxError> {
        let dir_path = self.plugin_dir(plugin_dir);
        if !dir_path.is_dir() {
            return Err(SandboxError::PluginNotFound(format!(
                "plugin directory not found at {}",
                dir_path.display()
            )));
        }
        let manifest_path = dir_path.join(MANIFEST_FILE_NAME);
        let yaml = std::fs::read_to_string(&manifest_path).map_err(|_| {
            SandboxError::Core(CoreError::ManifestNotFound(format!(
                "{}",
                manifest_path.display()
            )))
        })?;
        let manifest = PluginManifest::from_yaml(&yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Loads the manifest, then the module bytes it names, and verifies the
    /// module's checksum against the manifest before returning.
    pub fn load_plugin(&self, plugin_dir: &str) -> Result<Plugin, SandboxError> {
        let manifest = self.load_manifest(plugin_dir)?;
        let module_path = self.plugin_dir(plugin_dir).join(&manifest.module);
        let module_bytes = std::fs::read(&module_path).map_err(|_| {
            SandboxError::Core(CoreError::ModuleNotFound(format!(
                "{}",
                module_path.display()
            )))
        })?;
        let plugin = Plugin::from_manifest(&manifest, module_bytes)?;
        if let Err(err) = plugin.verify_integrity() {
            tracing::error!(plugin = plugin_dir, %err, "module checksum mismatch");
            return Err(err.into());
        }
        Ok(plugin)
    }

    /// Enumerates immediate subdirectories of the base directory that
    /// contain a readable `plugin.yaml`. Non-directory entries and
    /// directories without a manifest are silently skipped. A missing base
    /// directory returns an empty list, not an error.
    pub fn list_plugins(&self) -> Result<Vec<DiscoveredPlugin>, SandboxError> {
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SandboxError::InvalidPlugin(format!(
                    "cannot read plugin directory {}: {e}",
                    self.base_dir.display()
                )))
            }
        };

        let mut discovered = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Ok(manifest) = self.load_manifest(dir_name) {
                discovered.push(DiscoveredPlugin {
                    dir_name: dir_name.to_string(),
                    manifest,
                });
            }
        }
        Ok(discovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_plugin(base: &Path, dir_name: &str, module_bytes: &[u8], checksum_override: Option<&str>) {
        let plugin_path = base.join(dir_name);
        fs::create_dir_all(&plugin_path).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(module_bytes);
        let checksum = checksum_override
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("{:x}", hasher.finalize()));
        let manifest = format!(
            r#"
id: {dir_name}
name: Test Plugin
version: "1.0.0"
module: plugin.wasm
checksum: "{checksum}"
capabilities:
  - name: files:read
    justification: test
"#
        );
        fs::write(plugin_path.join(MANIFEST_FILE_NAME), manifest).unwrap();
        fs::write(plugin_path.join("plugin.wasm"), module_bytes).unwrap();
    }

    #[test]
    fn loads_plugin_with_matching_checksum() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "demo", b"\0asm fake bytes", None);
        let loader = Loader::new(dir.path());
        let plugin = loader.load_plugin("demo").unwrap();
        assert_eq!(plugin.id, "demo");
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "demo", b"\0asm fake bytes", Some(&"0".repeat(64)));
        let loader = Loader::new(dir.path());
        let err = loader.load_plugin("demo").unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Core(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn missing_plugin_directory_is_plugin_not_found() {
        let dir = TempDir::new().unwrap();
        let loader = Loader::new(dir.path());
        assert!(matches!(
            loader.load_manifest("nope"),
            Err(SandboxError::PluginNotFound(_))
        ));
    }

    #[test]
    fn missing_manifest_in_existing_directory_is_manifest_not_found() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("empty-dir")).unwrap();
        let loader = Loader::new(dir.path());
        assert!(matches!(
            loader.load_manifest("empty-dir"),
            Err(SandboxError::Core(CoreError::ManifestNotFound(_)))
        ));
    }

    #[test]
    fn list_plugins_skips_directories_without_manifest() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "good", b"abc", None);
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        let loader = Loader::new(dir.path());
        let found = loader.list_plugins().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dir_name, "good");
    }

    #[test]
    fn list_plugins_on_missing_base_dir_is_empty_not_error() {
        let loader = Loader::new("/nonexistent/preflight/base/dir");
        assert_eq!(loader.list_plugins().unwrap().len(), 0);
    }
}
