//! Binds a runtime, a config, and a services bundle into a single session
//! that can validate and execute one plugin at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use preflight_core::{Capability, Category, Config, ExecutionResult, Plugin, Policy, ResourceUsage};
use wasmtime::{Instance, Module, Store};

use crate::error::SandboxError;
use crate::runtime::{Runtime, StoreState};
use crate::services::HostServices;

/// The fuel budget given to every execution; this is the CPU-instruction
/// backstop that composes with (does not replace) the wall-clock timeout
/// (§5) — a guest that spins without making timeout-observable progress
/// still eventually traps.
const FUEL_BUDGET: u64 = 10_000_000;

/// A validated, executable binding of one runtime + config + services to
/// run plugins against. Cheap to construct; expensive state (the engine,
/// the linker) lives in the shared `Runtime`.
pub struct Sandbox {
    runtime: Arc<Runtime>,
    config: Config,
    services: Arc<HostServices>,
}

impl Sandbox {
    pub fn new(runtime: Arc<Runtime>, config: Config, services: Arc<HostServices>) -> Self {
        Self {
            runtime,
            config,
            services,
        }
    }

    /// (a) the plugin's intrinsic invariants hold (manifest validity,
    /// checksum); (b) its requirements validate against the configured
    /// policy, when both are present; (c) its module compiles in the
    /// engine. Never executes the module.
    pub fn validate(&self, plugin: &Plugin) -> Result<(), SandboxError> {
        plugin.verify_integrity()?;

        if let Some(policy) = effective_policy(&self.config) {
            let validation = plugin.requirements.validate_against(&policy);
            if !validation.is_valid() {
                let reason = validation
                    .denied
                    .first()
                    .map(|d| d.reason.clone())
                    .unwrap_or_else(|| "requirement denied".to_string());
                return Err(SandboxError::CapabilityDenied(reason));
            }
        }

        Module::new(self.runtime.engine(), &plugin.module_bytes).map_err(|e| {
            tracing::error!(plugin = %plugin.id, error = %e, "module does not compile");
            SandboxError::InvalidPlugin(format!("module does not compile: {e}"))
        })?;

        Ok(())
    }

    /// Runs `plugin` with `input` as its captured stdin. Precondition:
    /// `plugin` validates (this is re-checked at the top of the method, and
    /// its failure is a hard error — distinct from a runtime-phase failure
    /// inside the guest, which instead populates a failed `ExecutionResult`
    /// per §7's validation-phase/runtime-phase split).
    pub async fn execute(
        &self,
        plugin: &Plugin,
        input: &[u8],
    ) -> Result<ExecutionResult, SandboxError> {
        self.validate(plugin)?;

        let start = Instant::now();
        let engine = self.runtime.engine().clone();
        let linker = self.runtime.linker()?;
        let services = Arc::new(self.services.with_policy(effective_policy(&self.config)));
        let csp = self.config.csp.clone();
        let plugin_id = plugin.id.clone();
        let module_bytes = plugin.module_bytes.clone();
        let input = input.to_vec();
        let timeout = self.config.timeout;

        let span = tracing::info_span!("sandbox_execute", plugin = %plugin_id);
        let _entered = span.enter();

        let task = tokio::task::spawn_blocking(move || {
            run_guest(engine, linker, &module_bytes, services, csp, plugin_id, input)
        });

        let joined = if timeout.is_zero() {
            task.await
        } else {
            match tokio::time::timeout(timeout, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Ok(ExecutionResult::failure(
                        SandboxError::Timeout(timeout).to_string(),
                        start.elapsed(),
                    ));
                }
            }
        };

        let duration = start.elapsed();
        match joined {
            Ok(Ok(outcome)) => Ok(ExecutionResult::success(
                outcome.stdout,
                outcome.stderr,
                duration,
                outcome.resource_usage,
            )),
            Ok(Err(err)) => Ok(ExecutionResult::failure(err.to_string(), duration)),
            Err(join_err) => Ok(ExecutionResult::failure(
                format!("sandbox task did not complete cleanly: {join_err}"),
                duration,
            )),
        }
    }
}

/// Folds `config.allow_network`/`allow_filesystem` into `config.policy`: a
/// config that turns either switch off blocks that whole category outright,
/// on top of (not instead of) whatever the policy itself already denies.
/// Blocking dominates granting in `Policy::check`, so adding a wildcard
/// block here is sufficient regardless of what the policy separately grants.
fn effective_policy(config: &Config) -> Option<Arc<Policy>> {
    let policy = config.policy.as_ref()?;
    if config.allow_network && config.allow_filesystem {
        return Some(Arc::clone(policy));
    }

    let mut builder = Policy::builder()
        .grant_many(policy.granted().list())
        .block_many(policy.blocked().list())
        .require_approval(policy.require_approval());
    for cap in policy.approved().list() {
        builder = builder.approve(cap);
    }
    if !config.allow_network {
        builder = builder.block(Capability::new(Category::Network, "*"));
    }
    if !config.allow_filesystem {
        builder = builder.block(Capability::new(Category::Files, "*"));
    }
    Some(Arc::new(builder.build()))
}

/// Everything the blocking guest-execution task hands back to the async
/// caller once it completes.
struct GuestOutcome {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    resource_usage: ResourceUsage,
}

/// Compiles, instantiates, and runs one plugin invocation to completion.
/// Runs entirely synchronously on a blocking task — wasmtime's `Store` is
/// not async-aware, and host functions in this crate never yield.
fn run_guest(
    engine: wasmtime::Engine,
    linker: wasmtime::Linker<StoreState>,
    module_bytes: &[u8],
    services: Arc<HostServices>,
    csp: Option<Arc<preflight_core::Csp>>,
    plugin_id: String,
    input: Vec<u8>,
) -> Result<GuestOutcome, SandboxError> {
    let module = Module::new(&engine, module_bytes)
        .map_err(|e| SandboxError::InvalidPlugin(format!("module does not compile: {e}")))?;

    let state = StoreState::new(services, csp, plugin_id, input);
    let mut store = Store::new(&engine, state);
    store
        .set_fuel(FUEL_BUDGET)
        .map_err(|e| SandboxError::from_engine_error("setting fuel budget", e))?;

    let instance = linker
        .instantiate(&mut store, &module)
        .map_err(|e| SandboxError::from_engine_error("instantiating module", e))?;

    run_start_function(&instance, &mut store)?;
    run_entry_point(&instance, &mut store)?;

    let fuel_consumed = FUEL_BUDGET.saturating_sub(store.get_fuel().unwrap_or(0));
    let peak_memory_bytes = instance
        .get_memory(&mut store, "memory")
        .map(|m| m.data_size(&store) as u64)
        .unwrap_or(0);

    let stdout = store.data().stdout.contents().to_vec();
    let stderr = store.data().stderr.contents().to_vec();

    Ok(GuestOutcome {
        stdout,
        stderr,
        resource_usage: ResourceUsage {
            peak_memory_bytes,
            cpu_time: Duration::default(),
            fuel_consumed,
        },
    })
}

/// Invokes `_start` (the WASI command convention) or, failing that,
/// `_initialize` (the reactor convention), if the module exports either.
/// Absence of both is not an error — plain reactor modules with neither
/// entry point are valid.
fn run_start_function(
    instance: &Instance,
    store: &mut Store<StoreState>,
) -> Result<(), SandboxError> {
    if let Ok(start) = instance.get_typed_func::<(), ()>(&mut *store, "_start") {
        return start
            .call(&mut *store, ())
            .map_err(|e| SandboxError::from_engine_error("running _start", e));
    }
    if let Ok(init) = instance.get_typed_func::<(), ()>(&mut *store, "_initialize") {
        return init
            .call(&mut *store, ())
            .map_err(|e| SandboxError::from_engine_error("running _initialize", e));
    }
    Ok(())
}

/// Looks up `main` then `run`; a module exporting neither is a valid
/// no-op and succeeds with empty output (§4.7 step 4).
fn run_entry_point(
    instance: &Instance,
    store: &mut Store<StoreState>,
) -> Result<(), SandboxError> {
    for name in ["main", "run"] {
        if let Ok(entry) = instance.get_typed_func::<(), ()>(&mut *store, name) {
            return entry
                .call(&mut *store, ())
                .map_err(|e| SandboxError::from_engine_error(&format!("running {name}"), e));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use preflight_core::{full_isolation_config, Plugin, PluginManifest};

    const NOOP_WAT: &str = r#"(module (memory (export "memory") 1))"#;

    fn noop_plugin() -> Plugin {
        let bytes = wat::parse_str(NOOP_WAT).unwrap();
        let checksum = {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            format!("{:x}", hasher.finalize())
        };
        let yaml = format!(
            r#"
id: noop
name: Noop
version: "1.0.0"
module: plugin.wasm
checksum: "{checksum}"
"#
        );
        let manifest = PluginManifest::from_yaml(&yaml).unwrap();
        Plugin::from_manifest(&manifest, bytes).unwrap()
    }

    #[test]
    fn validate_accepts_a_well_formed_noop_module() {
        let runtime = Arc::new(Runtime::new().unwrap());
        let config = full_isolation_config();
        let services = Arc::new(crate::services::isolated_services(config.policy.clone()));
        let sandbox = Sandbox::new(runtime, config, services);
        assert!(sandbox.validate(&noop_plugin()).is_ok());
    }

    #[test]
    fn validate_denies_network_when_config_disables_it_even_though_policy_grants_it() {
        let runtime = Arc::new(Runtime::new().unwrap());
        let mut config = preflight_core::default_config();
        config.allow_network = false;
        let services = Arc::new(crate::services::isolated_services(config.policy.clone()));
        let sandbox = Sandbox::new(runtime, config, services);

        let bytes = wat::parse_str(NOOP_WAT).unwrap();
        let checksum = {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            format!("{:x}", hasher.finalize())
        };
        let yaml = format!(
            r#"
id: needs-net
name: Needs Net
version: "1.0.0"
module: plugin.wasm
checksum: "{checksum}"
capabilities:
  - name: network:fetch
    justification: download data
"#
        );
        let manifest = PluginManifest::from_yaml(&yaml).unwrap();
        let plugin = Plugin::from_manifest(&manifest, bytes).unwrap();

        let err = sandbox.validate(&plugin).expect_err("network is disabled at the config layer");
        assert!(matches!(err, SandboxError::CapabilityDenied(_)));
    }

    #[tokio::test]
    async fn execute_runs_a_module_with_no_entry_point_as_a_no_op() {
        let runtime = Arc::new(Runtime::new().unwrap());
        let config = full_isolation_config();
        let services = Arc::new(crate::services::isolated_services(config.policy.clone()));
        let sandbox = Sandbox::new(runtime, config, services);
        let result = sandbox.execute(&noop_plugin(), b"").await.unwrap();
        assert!(result.success);
        assert!(result.stdout.is_empty());
    }
}
