//! Sandbox execution configuration: isolation mode, timeouts, and resource
//! limits.

use std::sync::Arc;
use std::time::Duration;

use crate::csp::{default_csp, strict_csp, Csp};
use crate::policy::{default_policy, full_access_policy, restricted_policy, Policy};

/// The isolation posture a plugin runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No capability restrictions; used for first-party, fully audited
    /// plugins only.
    Full,
    /// The default posture: capability-gated, CSP-screened, approval
    /// required for dangerous capabilities.
    Restricted,
    /// Like `Restricted`, but the approval gate is disabled because the
    /// plugin has already been approved out of band (e.g. signed by the
    /// same key as the host).
    Trusted,
}

/// Resource ceilings enforced (or, where noted, merely advised) during
/// execution.
///
/// Only `max_cpu_time` is mechanically enforced, by the sandbox's
/// wall-clock timeout composed with wasmtime fuel metering (see
/// `preflight-sandbox`). The other fields are advisory: wasmtime has no
/// portable way to cap linear memory growth, open file descriptors, or
/// captured stdout/stderr size below the host OS's own limits, so these
/// values are recorded for audit and for host-function implementations
/// that choose to consult them (e.g. a `read_file` host function may refuse
/// to return more than `max_output_bytes`), but are not a sandbox-wide
/// guarantee.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_memory_bytes: u64,
    pub max_cpu_time: Duration,
    pub max_file_descriptors: u32,
    pub max_output_bytes: u64,
}

impl ResourceLimits {
    pub const fn new(
        max_memory_bytes: u64,
        max_cpu_time: Duration,
        max_file_descriptors: u32,
        max_output_bytes: u64,
    ) -> Self {
        Self {
            max_memory_bytes,
            max_cpu_time,
            max_file_descriptors,
            max_output_bytes,
        }
    }
}

/// Top-level execution configuration handed to the executor.
///
/// `policy` may be absent: a sandbox built from a policy-less config performs
/// no capability enforcement at call time (every gated host function is
/// permitted). This is distinct from `Mode::Full`, which merely turns off the
/// *approval* gate — a policy, even a permissive one, is still consulted.
///
/// `csp` screens `shell_exec` content before the capability gate is even
/// reached (§4.7); a sandbox with no CSP skips that screen entirely.
#[derive(Clone)]
pub struct Config {
    pub mode: Mode,
    pub timeout: Duration,
    pub limits: ResourceLimits,
    pub policy: Option<Arc<Policy>>,
    pub csp: Option<Arc<Csp>>,
    pub allow_network: bool,
    pub allow_filesystem: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("limits", &self.limits)
            .field("policy", &self.policy.is_some())
            .field("csp", &self.csp.is_some())
            .field("allow_network", &self.allow_network)
            .field("allow_filesystem", &self.allow_filesystem)
            .finish()
    }
}

impl Config {
    pub fn require_approval(&self) -> bool {
        !matches!(self.mode, Mode::Full | Mode::Trusted)
    }
}

/// 64 MiB memory, 30 second timeout, `default_policy()`, filesystem and
/// network both allowed (subject to the capability gate and CSP), approval
/// required for dangerous capabilities.
pub fn default_config() -> Config {
    Config {
        mode: Mode::Restricted,
        timeout: Duration::from_secs(30),
        limits: ResourceLimits::new(64 * 1024 * 1024, Duration::from_secs(30), 64, 1024 * 1024),
        policy: Some(Arc::new(default_policy())),
        csp: Some(Arc::new(default_csp())),
        allow_network: true,
        allow_filesystem: true,
    }
}

/// 16 MiB memory, 10 second timeout, `restricted_policy()`, network and
/// filesystem both disabled at the config layer (in addition to whatever
/// the policy would separately deny).
pub fn full_isolation_config() -> Config {
    Config {
        mode: Mode::Full,
        timeout: Duration::from_secs(10),
        limits: ResourceLimits::new(16 * 1024 * 1024, Duration::from_secs(10), 16, 256 * 1024),
        policy: Some(Arc::new(restricted_policy())),
        csp: Some(Arc::new(strict_csp())),
        allow_network: false,
        allow_filesystem: false,
    }
}

/// 256 MiB memory, 5 minute timeout, `full_access_policy()`, approval gate
/// disabled, network and filesystem both allowed.
pub fn trusted_config() -> Config {
    Config {
        mode: Mode::Trusted,
        timeout: Duration::from_secs(5 * 60),
        limits: ResourceLimits::new(
            256 * 1024 * 1024,
            Duration::from_secs(5 * 60),
            256,
            16 * 1024 * 1024,
        ),
        policy: Some(Arc::new(full_access_policy())),
        csp: Some(Arc::new(default_csp())),
        allow_network: true,
        allow_filesystem: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_requires_approval() {
        assert!(default_config().require_approval());
    }

    #[test]
    fn trusted_config_skips_approval() {
        assert!(!trusted_config().require_approval());
    }

    #[test]
    fn full_isolation_disables_network_and_filesystem() {
        let cfg = full_isolation_config();
        assert!(!cfg.allow_network);
        assert!(!cfg.allow_filesystem);
    }

    #[test]
    fn presets_have_distinct_timeouts() {
        assert!(full_isolation_config().timeout < default_config().timeout);
        assert!(default_config().timeout < trusted_config().timeout);
    }

    #[test]
    fn presets_carry_their_named_policy() {
        use crate::capability::{Capability, Category};
        let trusted = trusted_config();
        assert!(trusted
            .policy
            .unwrap()
            .check(&Capability::new(Category::Shell, "execute"))
            .is_allowed());

        let full_isolation = full_isolation_config();
        assert_eq!(
            full_isolation
                .policy
                .unwrap()
                .check(&Capability::new(Category::Shell, "execute")),
            crate::policy::Decision::Blocked
        );
    }
}
