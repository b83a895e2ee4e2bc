//! Error taxonomy shared by the capability model, policy, CSP, and manifest
//! types. Every variant corresponds to one of the stable "kind" tags the
//! sandbox boundary promises to surface distinguishably.

use thiserror::Error;

/// The thirteen stable kinds distinguishable at the sandbox boundary,
/// spanning both this crate's errors and `preflight-sandbox`'s. `Copy` and
/// cheap to match on, so callers can branch on kind without formatting or
/// downcasting a `Display` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PluginNotFound,
    InvalidPlugin,
    SandboxTimeout,
    ResourceExhausted,
    CapabilityDenied,
    SandboxUnavailable,
    PluginManifestNotFound,
    PluginModuleNotFound,
    PluginChecksumMismatch,
    PluginManifestInvalid,
    InvalidCapability,
    CapabilityNotGranted,
    DangerousCapabilityRequiresApproval,
}

/// Errors arising from the capability model, policy evaluation, CSP
/// compilation, and manifest parsing/validation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid capability: {detail}")]
    InvalidCapability { detail: String },

    #[error("capability not granted: {capability}")]
    CapabilityNotGranted { capability: String },

    #[error("capability blocked by policy: {capability}")]
    CapabilityBlocked { capability: String },

    #[error("dangerous capability requires approval: {capability}")]
    RequiresApproval { capability: String },

    #[error("invalid content security policy pattern {pattern:?}: {source}")]
    InvalidCspPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("plugin manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("plugin manifest invalid: {0}")]
    ManifestInvalid(String),

    #[error("plugin module not found: {0}")]
    ModuleNotFound(String),

    #[error("plugin checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl CoreError {
    /// True for the two decision kinds that represent an outright denial
    /// (as opposed to a parse/config error or a pending-approval state).
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            CoreError::CapabilityNotGranted { .. } | CoreError::CapabilityBlocked { .. }
        )
    }

    pub fn is_pending_approval(&self) -> bool {
        matches!(self, CoreError::RequiresApproval { .. })
    }

    /// Maps this error onto one of the thirteen boundary kinds. The
    /// taxonomy names only "capability not granted", not a separate
    /// "capability blocked" — both denial modes of `Policy::check` fold into
    /// the same kind here; `CapabilityDenied` at the sandbox boundary is
    /// reserved for `SandboxError`'s own, coarser-grained denial.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidCapability { .. } => ErrorKind::InvalidCapability,
            CoreError::CapabilityNotGranted { .. } | CoreError::CapabilityBlocked { .. } => {
                ErrorKind::CapabilityNotGranted
            }
            CoreError::RequiresApproval { .. } => ErrorKind::DangerousCapabilityRequiresApproval,
            CoreError::InvalidCspPattern { .. } => ErrorKind::PluginManifestInvalid,
            CoreError::ManifestNotFound(_) => ErrorKind::PluginManifestNotFound,
            CoreError::ManifestInvalid(_) => ErrorKind::PluginManifestInvalid,
            CoreError::ModuleNotFound(_) => ErrorKind::PluginModuleNotFound,
            CoreError::ChecksumMismatch { .. } => ErrorKind::PluginChecksumMismatch,
        }
    }
}

#[cfg(test)]
mod kind_tests {
    use super::*;

    #[test]
    fn checksum_mismatch_reports_its_named_kind() {
        let err = CoreError::ChecksumMismatch {
            expected: "a".repeat(64),
            actual: "b".repeat(64),
        };
        assert_eq!(err.kind(), ErrorKind::PluginChecksumMismatch);
    }

    #[test]
    fn blocked_and_not_granted_share_a_kind() {
        let blocked = CoreError::CapabilityBlocked {
            capability: "shell:execute".into(),
        };
        let not_granted = CoreError::CapabilityNotGranted {
            capability: "shell:execute".into(),
        };
        assert_eq!(blocked.kind(), ErrorKind::CapabilityNotGranted);
        assert_eq!(not_granted.kind(), ErrorKind::CapabilityNotGranted);
    }
}
