//! The administrator-facing YAML surface: a short list of blocked
//! capabilities and extra CSP rules layered on top of the built-in
//! defaults, rather than a full policy/CSP authored from scratch.

use crate::capability::Capability;
use crate::csp::{default_csp, Csp, CspBuilder, Severity};
use crate::error::CoreError;
use crate::policy::{full_access_policy, Policy, PolicyBuilder};

/// ```yaml
/// blocked_capabilities: [shell:execute, secrets:read]
/// csp_deny:
///   - pattern: "sudo\\s+"
///     reason: "No sudo"
/// csp_warn:
///   - pattern: "eval\\s+"
///     reason: "Review eval use"
/// require_approval: true      # optional; absent -> default true
/// ```
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    #[serde(default)]
    pub blocked_capabilities: Vec<String>,
    #[serde(default)]
    pub csp_deny: Vec<CspPatternEntry>,
    #[serde(default)]
    pub csp_warn: Vec<CspPatternEntry>,
    #[serde(default)]
    pub require_approval: Option<bool>,
}

/// One administrator-declared CSP rule; `reason` doubles as the rule's
/// display name (there is no separate name field in the external format).
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CspPatternEntry {
    pub pattern: String,
    pub reason: String,
}

impl SecurityConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::ManifestInvalid(format!("invalid security config YAML: {e}")))
    }

    /// Starts from a full-grant baseline (every well-known capability,
    /// wildcard per category — see `full_access_policy`), then blocks each
    /// listed capability. Unlike the policy builder's string helpers, a
    /// token here that fails to parse aborts the whole load: an
    /// administrator's security config is the last line of defense, so a
    /// typo must be loud, not silently dropped.
    pub fn to_policy(&self) -> Result<Policy, CoreError> {
        let base = full_access_policy();
        let mut builder = PolicyBuilder::new()
            .grant_many(base.granted().list())
            .require_approval(self.require_approval.unwrap_or(base.require_approval()));
        for token in &self.blocked_capabilities {
            let capability = Capability::parse(token).map_err(|_| CoreError::ManifestInvalid(
                format!("invalid blocked capability {token:?}"),
            ))?;
            builder = builder.block(capability);
        }
        Ok(builder.build())
    }

    /// Builds on `default_csp()`'s own rules (via `Csp::into_builder`, so
    /// there is exactly one place the default pattern list is written out)
    /// plus the administrator's extra deny/warn rules appended after them.
    pub fn to_csp(&self) -> Result<Csp, CoreError> {
        let mut builder = default_csp().into_builder();
        for entry in &self.csp_deny {
            builder = add_leaked(builder, entry, Severity::Deny);
        }
        for entry in &self.csp_warn {
            builder = add_leaked(builder, entry, Severity::Warn);
        }
        builder.build()
    }

    /// Right-biased merge: blocked capabilities and CSP rule lists are
    /// unioned (capability list deduplicated by string), and `other`'s
    /// `require_approval` wins when present, else `self`'s is kept.
    pub fn merge(&self, other: &SecurityConfig) -> SecurityConfig {
        let mut blocked = self.blocked_capabilities.clone();
        for token in &other.blocked_capabilities {
            if !blocked.contains(token) {
                blocked.push(token.clone());
            }
        }
        let mut csp_deny = self.csp_deny.clone();
        csp_deny.extend(other.csp_deny.clone());
        let mut csp_warn = self.csp_warn.clone();
        csp_warn.extend(other.csp_warn.clone());
        SecurityConfig {
            blocked_capabilities: blocked,
            csp_deny,
            csp_warn,
            require_approval: other.require_approval.or(self.require_approval),
        }
    }
}

fn add_leaked(builder: CspBuilder, entry: &CspPatternEntry, severity: Severity) -> CspBuilder {
    // `rule()` takes `&'static str`; administrator patterns are only known
    // at runtime, so leak them. Security configs are loaded once at startup
    // and live for the process lifetime, so this is bounded, not a leak in
    // the colloquial sense of unbounded growth.
    let reason: &'static str = Box::leak(entry.reason.clone().into_boxed_str());
    let pattern: &'static str = Box::leak(entry.pattern.clone().into_boxed_str());
    builder.rule(reason, severity, pattern)
}
