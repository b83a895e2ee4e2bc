//! The top-level entry point: loads a plugin by directory name, builds a
//! sandbox, validates, and (optionally) executes — tearing the sandbox down
//! on every exit path.

use std::sync::Arc;

use preflight_core::{Config, ExecutionResult};

use crate::error::SandboxError;
use crate::loader::Loader;
use crate::runtime::Runtime;
use crate::sandbox::Sandbox;
use crate::services::HostServices;

/// Owns a runtime and a loader; every call constructs a fresh `Sandbox` so
/// one plugin's state never leaks into the next.
pub struct Executor {
    runtime: Arc<Runtime>,
    loader: Loader,
    services: Arc<HostServices>,
}

impl Executor {
    pub fn new(runtime: Arc<Runtime>, loader: Loader, services: Arc<HostServices>) -> Self {
        Self {
            runtime,
            loader,
            services,
        }
    }

    /// Loads, constructs a sandbox, validates, and executes `plugin_dir`
    /// under `config`, feeding it `input` as stdin. Each stage's error is
    /// prefixed with the stage name so diagnostics stay traceable to where
    /// they originated (§4.8).
    pub async fn run(
        &self,
        plugin_dir: &str,
        config: Config,
        input: &[u8],
    ) -> Result<ExecutionResult, SandboxError> {
        let plugin = self
            .loader
            .load_plugin(plugin_dir)
            .map_err(|e| e.at_stage("failed to load plugin"))?;

        let sandbox = Sandbox::new(Arc::clone(&self.runtime), config, Arc::clone(&self.services));

        sandbox
            .validate(&plugin)
            .map_err(|e| e.at_stage("plugin validation failed"))?;

        sandbox.execute(&plugin, input).await
    }

    /// Loads and validates `plugin_dir` without executing it — used to
    /// check a plugin is runnable (and what it would need approved) ahead
    /// of time.
    pub fn validate_plugin(&self, plugin_dir: &str, config: Config) -> Result<(), SandboxError> {
        let plugin = self
            .loader
            .load_plugin(plugin_dir)
            .map_err(|e| e.at_stage("failed to load plugin"))?;

        let sandbox = Sandbox::new(Arc::clone(&self.runtime), config, Arc::clone(&self.services));

        sandbox
            .validate(&plugin)
            .map_err(|e| e.at_stage("plugin validation failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preflight_core::full_isolation_config;
    use sha2::{Digest, Sha256};
    use std::fs;
    use tempfile::TempDir;

    fn write_noop_plugin(base: &std::path::Path, dir_name: &str) {
        let bytes = wat::parse_str(r#"(module (memory (export "memory") 1))"#).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let checksum = format!("{:x}", hasher.finalize());
        let plugin_path = base.join(dir_name);
        fs::create_dir_all(&plugin_path).unwrap();
        fs::write(
            plugin_path.join("plugin.yaml"),
            format!(
                r#"
id: {dir_name}
name: Noop
version: "1.0.0"
module: plugin.wasm
checksum: "{checksum}"
"#
            ),
        )
        .unwrap();
        fs::write(plugin_path.join("plugin.wasm"), bytes).unwrap();
    }

    #[tokio::test]
    async fn run_executes_a_loaded_noop_plugin() {
        let dir = TempDir::new().unwrap();
        write_noop_plugin(dir.path(), "demo");

        let runtime = Arc::new(Runtime::new().unwrap());
        let loader = Loader::new(dir.path());
        let config = full_isolation_config();
        let services = Arc::new(crate::services::isolated_services(config.policy.clone()));
        let executor = Executor::new(runtime, loader, services);

        let result = executor.run("demo", config, b"").await.unwrap();
        assert!(result.success);
    }

    #[test]
    fn validate_plugin_reports_missing_plugin_with_stage_prefix() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(Runtime::new().unwrap());
        let loader = Loader::new(dir.path());
        let config = full_isolation_config();
        let services = Arc::new(crate::services::isolated_services(config.policy.clone()));
        let executor = Executor::new(runtime, loader, services);

        let err = executor
            .validate_plugin("missing", config)
            .expect_err("plugin directory does not exist");
        assert!(err.to_string().contains("failed to load plugin"));
    }
}
