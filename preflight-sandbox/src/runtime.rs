//! The embedded WebAssembly engine, host-function registration, and the
//! per-execution store state gated host functions dispatch through.

use std::sync::{Arc, Mutex};

use preflight_core::{Capability, Category, Csp, Decision};
use wasmtime::{Caller, Config as EngineConfig, Engine, Linker, Memory};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{
    pipe::{MemoryInputPipe, MemoryOutputPipe},
    WasiCtxBuilder,
};

use crate::error::SandboxError;
use crate::services::HostServices;

/// A guest-visible status code returned by every gated host function.
/// Zero means success; guests must check this before trusting the
/// accompanying pointer/length pair.
mod status {
    pub const OK: u32 = 0;
    pub const BLOCKED: u32 = 1;
    pub const NOT_GRANTED: u32 = 2;
    pub const NEEDS_APPROVAL: u32 = 3;
    pub const CSP_DENIED: u32 = 4;
    pub const SERVICE_ERROR: u32 = 5;
    pub const NO_GUEST_ALLOCATOR: u32 = 6;
    pub const MEMORY_ACCESS: u32 = 7;
}

fn status_for_decision(decision: Decision) -> u32 {
    match decision {
        Decision::Allowed => status::OK,
        Decision::Blocked => status::BLOCKED,
        Decision::NotGranted => status::NOT_GRANTED,
        Decision::NeedsApproval => status::NEEDS_APPROVAL,
    }
}

/// State carried by the per-execution `Store`. Gated host functions reach
/// this via `caller.data()` to consult the services bundle and CSP at
/// dispatch time.
pub struct StoreState {
    pub wasi: WasiP1Ctx,
    pub services: Arc<HostServices>,
    pub csp: Option<Arc<Csp>>,
    pub plugin_id: String,
    pub stdout: MemoryOutputPipe,
    pub stderr: MemoryOutputPipe,
}

impl StoreState {
    pub fn new(
        services: Arc<HostServices>,
        csp: Option<Arc<Csp>>,
        plugin_id: String,
        input: Vec<u8>,
    ) -> Self {
        let stdout = MemoryOutputPipe::new(1024 * 1024);
        let stderr = MemoryOutputPipe::new(1024 * 1024);
        let stdin = MemoryInputPipe::new(input);
        let wasi = WasiCtxBuilder::new()
            .stdin(stdin)
            .stdout(stdout.clone())
            .stderr(stderr.clone())
            .build_p1();
        Self {
            wasi,
            services,
            csp,
            plugin_id,
            stdout,
            stderr,
        }
    }
}

/// Reads a UTF-8 (lossy) string out of the instance's exported `memory`.
/// Absent memory or an out-of-bounds range yields an empty string rather
/// than panicking (§4.7).
fn read_string(caller: &mut Caller<'_, StoreState>, ptr: u32, len: u32) -> String {
    String::from_utf8_lossy(&read_bytes(caller, ptr, len)).into_owned()
}

fn read_bytes(caller: &mut Caller<'_, StoreState>, ptr: u32, len: u32) -> Vec<u8> {
    let Some(memory) = guest_memory(caller) else {
        return Vec::new();
    };
    let data = memory.data(&*caller);
    let (ptr, len) = (ptr as usize, len as usize);
    match ptr.checked_add(len) {
        Some(end) if end <= data.len() => data[ptr..end].to_vec(),
        _ => Vec::new(),
    }
}

fn guest_memory(caller: &mut Caller<'_, StoreState>) -> Option<Memory> {
    caller.get_export("memory")?.into_memory()
}

/// Allocates `bytes.len()` bytes in the guest via its exported `alloc`
/// function and writes them in, returning `(ptr, len, status)`. A module
/// that doesn't export `alloc` can still receive fixed-size/no-payload
/// results; any host function trying to hand back a buffer to such a
/// module instead reports `NO_GUEST_ALLOCATOR` and an empty buffer, never
/// a panic.
fn write_buffer(caller: &mut Caller<'_, StoreState>, bytes: &[u8]) -> (u32, u32, u32) {
    if bytes.is_empty() {
        return (0, 0, status::OK);
    }
    let Some(alloc) = caller
        .get_export("alloc")
        .and_then(|e| e.into_func())
        .and_then(|f| f.typed::<u32, u32>(&*caller).ok())
    else {
        return (0, 0, status::NO_GUEST_ALLOCATOR);
    };
    let Ok(ptr) = alloc.call(&mut *caller, bytes.len() as u32) else {
        return (0, 0, status::NO_GUEST_ALLOCATOR);
    };
    let Some(memory) = guest_memory(caller) else {
        return (0, 0, status::MEMORY_ACCESS);
    };
    if memory.write(&mut *caller, ptr as usize, bytes).is_err() {
        return (0, 0, status::MEMORY_ACCESS);
    }
    (ptr, bytes.len() as u32, status::OK)
}

/// Checks `cap` against the store's services and, when denied, logs the
/// reason at warn level through the host logger (the guest only ever sees
/// the numeric status).
fn gate(caller: &mut Caller<'_, StoreState>, cap: Capability) -> Decision {
    let decision = caller.data().services.check_capability(&cap);
    if !decision.is_allowed() {
        let plugin_id = caller.data().plugin_id.clone();
        caller
            .data()
            .services
            .logger
            .warn(&format!("{plugin_id}: denied {cap} ({decision:?})"));
    } else if cap.is_dangerous() {
        let plugin_id = caller.data().plugin_id.clone();
        caller
            .data()
            .services
            .logger
            .info(&format!("{plugin_id}: using dangerous capability {cap}"));
    }
    decision
}

/// Whether registration of the `preflight` host-function namespace has
/// happened yet for a given `Runtime`. First registration wins and is
/// final for the runtime's lifetime (§5).
enum Registration {
    Unregistered,
    Registered(Linker<StoreState>),
}

/// Wraps the embedded WebAssembly engine. Host functions and WASI are
/// registered into one `Linker`, lazily and idempotently, the first time a
/// sandbox actually needs it — not at construction — since registration
/// requires no config beyond the engine itself but building it eagerly
/// would do needless work for a runtime that is only ever used to validate
/// plugins without executing them.
pub struct Runtime {
    engine: Engine,
    registration: Mutex<Registration>,
    closed: Mutex<bool>,
}

impl Runtime {
    pub fn new() -> Result<Self, SandboxError> {
        let mut config = EngineConfig::new();
        config.consume_fuel(true);
        config.wasm_memory64(false);
        let engine = Engine::new(&config)
            .map_err(|e| SandboxError::InvalidPlugin(format!("engine creation failed: {e}")))?;
        Ok(Self {
            engine,
            registration: Mutex::new(Registration::Unregistered),
            closed: Mutex::new(false),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Idempotent; a second call after close is a no-op, matching the
    /// "idempotent close" contract of §4.7.
    pub fn close(&self) {
        let mut closed = self.closed.lock().expect("runtime mutex poisoned");
        *closed = true;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().expect("runtime mutex poisoned")
    }

    /// Returns a cheap clone of the registered linker, building it on first
    /// use. The mutex is only ever held around this check-and-build, never
    /// across a guest call (§5's lock discipline).
    pub fn linker(&self) -> Result<Linker<StoreState>, SandboxError> {
        if self.is_closed() {
            return Err(SandboxError::SandboxUnavailable);
        }
        let mut registration = self.registration.lock().expect("runtime mutex poisoned");
        if let Registration::Unregistered = *registration {
            let linker = build_linker(&self.engine)?;
            *registration = Registration::Registered(linker);
        }
        match &*registration {
            Registration::Registered(linker) => Ok(linker.clone()),
            Registration::Unregistered => unreachable!("just registered above"),
        }
    }
}

fn build_linker(engine: &Engine) -> Result<Linker<StoreState>, SandboxError> {
    let mut linker: Linker<StoreState> = Linker::new(engine);

    wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state: &mut StoreState| {
        &mut state.wasi
    })
    .map_err(|e| SandboxError::InvalidPlugin(format!("failed to link WASI: {e}")))?;

    linker
        .func_wrap(
            "preflight",
            "log_info",
            |mut caller: Caller<'_, StoreState>, ptr: u32, len: u32| {
                let message = read_string(&mut caller, ptr, len);
                caller.data().services.logger.info(&message);
            },
        )
        .map_err(link_err)?;
    linker
        .func_wrap(
            "preflight",
            "log_warn",
            |mut caller: Caller<'_, StoreState>, ptr: u32, len: u32| {
                let message = read_string(&mut caller, ptr, len);
                caller.data().services.logger.warn(&message);
            },
        )
        .map_err(link_err)?;
    linker
        .func_wrap(
            "preflight",
            "log_error",
            |mut caller: Caller<'_, StoreState>, ptr: u32, len: u32| {
                let message = read_string(&mut caller, ptr, len);
                caller.data().services.logger.error(&message);
            },
        )
        .map_err(link_err)?;

    linker
        .func_wrap(
            "preflight",
            "read_file",
            |mut caller: Caller<'_, StoreState>, path_ptr: u32, path_len: u32| -> (u32, u32, u32) {
                let decision = gate(&mut caller, Capability::new(Category::Files, "read"));
                if !decision.is_allowed() {
                    return (0, 0, status_for_decision(decision));
                }
                let path = read_string(&mut caller, path_ptr, path_len);
                match caller.data().services.filesystem.read_file(&path) {
                    Ok(bytes) => write_buffer(&mut caller, &bytes),
                    Err(_) => (0, 0, status::SERVICE_ERROR),
                }
            },
        )
        .map_err(link_err)?;

    linker
        .func_wrap(
            "preflight",
            "write_file",
            |mut caller: Caller<'_, StoreState>,
             path_ptr: u32,
             path_len: u32,
             data_ptr: u32,
             data_len: u32|
             -> u32 {
                let decision = gate(&mut caller, Capability::new(Category::Files, "write"));
                if !decision.is_allowed() {
                    return status_for_decision(decision);
                }
                let path = read_string(&mut caller, path_ptr, path_len);
                let data = read_bytes(&mut caller, data_ptr, data_len);
                match caller.data().services.filesystem.write_file(&path, &data) {
                    Ok(()) => status::OK,
                    Err(_) => status::SERVICE_ERROR,
                }
            },
        )
        .map_err(link_err)?;

    linker
        .func_wrap(
            "preflight",
            "file_exists",
            |mut caller: Caller<'_, StoreState>, path_ptr: u32, path_len: u32| -> u32 {
                let decision = gate(&mut caller, Capability::new(Category::Files, "read"));
                if !decision.is_allowed() {
                    return 0;
                }
                let path = read_string(&mut caller, path_ptr, path_len);
                u32::from(caller.data().services.filesystem.exists(&path))
            },
        )
        .map_err(link_err)?;

    linker
        .func_wrap(
            "preflight",
            "brew_install",
            |mut caller: Caller<'_, StoreState>, name_ptr: u32, name_len: u32| -> u32 {
                let decision = gate(&mut caller, Capability::new(Category::Packages, "brew"));
                if !decision.is_allowed() {
                    return status_for_decision(decision);
                }
                let name = read_string(&mut caller, name_ptr, name_len);
                match caller.data().services.packages.install(&name) {
                    Ok(()) => status::OK,
                    Err(_) => status::SERVICE_ERROR,
                }
            },
        )
        .map_err(link_err)?;

    linker
        .func_wrap(
            "preflight",
            "brew_list",
            |mut caller: Caller<'_, StoreState>| -> (u32, u32, u32) {
                let decision = gate(&mut caller, Capability::new(Category::Packages, "brew"));
                if !decision.is_allowed() {
                    return (0, 0, status_for_decision(decision));
                }
                match caller.data().services.packages.list() {
                    Ok(names) => write_buffer(&mut caller, names.join("\n").as_bytes()),
                    Err(_) => (0, 0, status::SERVICE_ERROR),
                }
            },
        )
        .map_err(link_err)?;

    linker
        .func_wrap(
            "preflight",
            "apt_install",
            |mut caller: Caller<'_, StoreState>, name_ptr: u32, name_len: u32| -> u32 {
                let decision = gate(&mut caller, Capability::new(Category::Packages, "apt"));
                if !decision.is_allowed() {
                    return status_for_decision(decision);
                }
                let name = read_string(&mut caller, name_ptr, name_len);
                match caller.data().services.packages.install(&name) {
                    Ok(()) => status::OK,
                    Err(_) => status::SERVICE_ERROR,
                }
            },
        )
        .map_err(link_err)?;

    linker
        .func_wrap(
            "preflight",
            "shell_exec",
            |mut caller: Caller<'_, StoreState>, cmd_ptr: u32, cmd_len: u32| -> (u32, u32, u32) {
                let cmd = read_string(&mut caller, cmd_ptr, cmd_len);

                if let Some(csp) = caller.data().csp.clone() {
                    if csp.validate(&cmd).has_deny() {
                        let plugin_id = caller.data().plugin_id.clone();
                        caller.data().services.logger.warn(&format!(
                            "{plugin_id}: shell command rejected by content security policy"
                        ));
                        return (0, 0, status::CSP_DENIED);
                    }
                }

                let decision = gate(&mut caller, Capability::new(Category::Shell, "execute"));
                if !decision.is_allowed() {
                    return (0, 0, status_for_decision(decision));
                }
                match caller.data().services.shell.exec(&cmd, &[]) {
                    Ok((output, _code)) => write_buffer(&mut caller, &output),
                    Err(_) => (0, 0, status::SERVICE_ERROR),
                }
            },
        )
        .map_err(link_err)?;

    linker
        .func_wrap(
            "preflight",
            "http_get",
            |mut caller: Caller<'_, StoreState>, url_ptr: u32, url_len: u32| -> (u32, u32, u32) {
                let decision = gate(&mut caller, Capability::new(Category::Network, "fetch"));
                if !decision.is_allowed() {
                    return (0, 0, status_for_decision(decision));
                }
                let url = read_string(&mut caller, url_ptr, url_len);
                match caller.data().services.http.get(&url) {
                    Ok((body, status_code)) => {
                        let (ptr, len, status) = write_buffer(&mut caller, &body);
                        if status != status::OK {
                            (ptr, len, status)
                        } else {
                            (ptr, len, status_code as u32)
                        }
                    }
                    Err(_) => (0, 0, status::SERVICE_ERROR),
                }
            },
        )
        .map_err(link_err)?;

    linker
        .func_wrap(
            "preflight",
            "http_post",
            |mut caller: Caller<'_, StoreState>,
             url_ptr: u32,
             url_len: u32,
             ct_ptr: u32,
             ct_len: u32,
             body_ptr: u32,
             body_len: u32|
             -> (u32, u32, u32) {
                let decision = gate(&mut caller, Capability::new(Category::Network, "fetch"));
                if !decision.is_allowed() {
                    return (0, 0, status_for_decision(decision));
                }
                let url = read_string(&mut caller, url_ptr, url_len);
                let content_type = read_string(&mut caller, ct_ptr, ct_len);
                let body = read_bytes(&mut caller, body_ptr, body_len);
                match caller.data().services.http.post(&url, &content_type, &body) {
                    Ok((response_body, status_code)) => {
                        let (ptr, len, status) = write_buffer(&mut caller, &response_body);
                        if status != status::OK {
                            (ptr, len, status)
                        } else {
                            (ptr, len, status_code as u32)
                        }
                    }
                    Err(_) => (0, 0, status::SERVICE_ERROR),
                }
            },
        )
        .map_err(link_err)?;

    Ok(linker)
}

fn link_err(e: anyhow::Error) -> SandboxError {
    SandboxError::InvalidPlugin(format!("failed to register host function: {e}"))
}
