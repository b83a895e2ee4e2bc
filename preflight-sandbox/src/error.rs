//! Runtime-side error taxonomy: the loader, runtime, and executor kinds
//! that round out the thirteen stable kinds alongside `preflight_core::CoreError`.

use thiserror::Error;

/// Errors arising from loading, sandboxing, and executing a plugin module.
///
/// `CoreError` variants (capability/policy/manifest errors) are wrapped
/// rather than duplicated: this enum owns the kinds that only make sense
/// once a WASM engine is involved.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error(transparent)]
    Core(#[from] preflight_core::CoreError),

    #[error("invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("sandbox timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("capability denied: {0}")]
    CapabilityDenied(String),

    #[error("sandbox unavailable")]
    SandboxUnavailable,

    #[error("plugin execution failed: {0}")]
    ExecutionFailed(String),

    /// A lower error, tagged with the pipeline stage it surfaced from
    /// (§4.8: "failed to load plugin:", "plugin validation failed:", …).
    /// `kind()` delegates to `source` so wrapping never erases the
    /// distinguishable kind the boundary promises — only the message grows
    /// a prefix.
    #[error("{stage}: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<SandboxError>,
    },
}

impl SandboxError {
    /// Maps this error onto one of the thirteen boundary kinds (§6).
    /// `ExecutionFailed` has no dedicated kind of its own: guest traps,
    /// compile errors, and instantiation failures never escape `execute` as
    /// a typed error in the first place — they're stringified into
    /// `ExecutionResult.error` per the validation-phase/runtime-phase split
    /// (§7) — so `InvalidPlugin` is the closest fit for the rare caller that
    /// inspects one directly (e.g. from `Sandbox::validate`'s own compile
    /// check, which does return it as a hard error).
    pub fn kind(&self) -> preflight_core::ErrorKind {
        use preflight_core::ErrorKind;
        match self {
            SandboxError::PluginNotFound(_) => ErrorKind::PluginNotFound,
            SandboxError::Core(core_err) => core_err.kind(),
            SandboxError::InvalidPlugin(_) => ErrorKind::InvalidPlugin,
            SandboxError::Timeout(_) => ErrorKind::SandboxTimeout,
            SandboxError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            SandboxError::CapabilityDenied(_) => ErrorKind::CapabilityDenied,
            SandboxError::SandboxUnavailable => ErrorKind::SandboxUnavailable,
            SandboxError::ExecutionFailed(_) => ErrorKind::InvalidPlugin,
            SandboxError::Stage { source, .. } => source.kind(),
        }
    }

    /// Tags `self` with the pipeline stage it surfaced from, without losing
    /// its own `kind()`.
    pub fn at_stage(self, stage: &str) -> Self {
        SandboxError::Stage {
            stage: stage.to_string(),
            source: Box::new(self),
        }
    }

    /// Wraps a `wasmtime`/`anyhow` error into the closest matching kind,
    /// recognizing fuel exhaustion (reported by wasmtime as a string, not a
    /// distinct error type) as `ResourceExhausted` rather than a generic
    /// execution failure. Wall-clock timeouts are detected separately by
    /// the caller (via `tokio::time::timeout`'s `Elapsed`), not here.
    pub fn from_engine_error(context: &str, err: anyhow::Error) -> Self {
        let text = err.to_string();
        if text.contains("fuel") {
            SandboxError::ResourceExhausted(format!("{context}: fuel exhausted"))
        } else {
            SandboxError::ExecutionFailed(format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preflight_core::ErrorKind;

    #[test]
    fn from_engine_error_recognizes_fuel_exhaustion() {
        let err = SandboxError::from_engine_error("running run", anyhow::anyhow!("all fuel consumed by WebAssembly"));
        assert!(matches!(err, SandboxError::ResourceExhausted(_)));
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn from_engine_error_falls_back_to_execution_failed() {
        let err = SandboxError::from_engine_error("instantiating module", anyhow::anyhow!("unknown import"));
        assert!(matches!(err, SandboxError::ExecutionFailed(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidPlugin);
    }

    #[test]
    fn core_error_kind_passes_through() {
        let err = SandboxError::Core(preflight_core::CoreError::ModuleNotFound("x".into()));
        assert_eq!(err.kind(), ErrorKind::PluginModuleNotFound);
    }

    #[test]
    fn at_stage_prefixes_the_message_without_losing_the_kind() {
        let err = SandboxError::Core(preflight_core::CoreError::ChecksumMismatch {
            expected: "a".repeat(64),
            actual: "b".repeat(64),
        })
        .at_stage("failed to load plugin");
        assert_eq!(err.kind(), ErrorKind::PluginChecksumMismatch);
        assert!(err.to_string().starts_with("failed to load plugin: "));
    }
}
