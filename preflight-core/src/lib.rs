//! Capability model, policy evaluation, content security rules, and plugin
//! manifest handling for the preflight WASM plugin sandbox.
//!
//! This crate has no knowledge of WebAssembly itself — that lives in
//! `preflight-sandbox`, which depends on this crate for the types that
//! decide *whether* a plugin may do something, leaving *how* it is run to
//! the sandbox crate.
//!
//! Read order for newcomers: `capability` and `capability_set` first (the
//! vocabulary), then `policy` (the decision function), then `csp` and
//! `manifest` (the two other gates a plugin's content passes through), then
//! `config`/`execution` (the shapes the sandbox crate fills in), then
//! `security_config` (how an administrator's YAML becomes a `Policy` and a
//! `Csp`).

pub mod capability;
pub mod capability_set;
pub mod config;
pub mod csp;
pub mod error;
pub mod execution;
pub mod manifest;
pub mod policy;
pub mod requirement;
pub mod security_config;

pub use capability::{Capability, Category, DANGEROUS};
pub use capability_set::CapabilitySet;
pub use config::{default_config, full_isolation_config, trusted_config, Config, Mode, ResourceLimits};
pub use csp::{default_csp, strict_csp, Csp, CspResult, Severity};
pub use error::{CoreError, ErrorKind};
pub use execution::{ExecutionResult, ResourceUsage};
pub use manifest::{ManifestCapability, Plugin, PluginManifest};
pub use policy::{default_policy, full_access_policy, restricted_policy, Decision, Policy};
pub use requirement::{Denial, Requirement, RequirementValidation, Requirements};
pub use security_config::{CspPatternEntry, SecurityConfig};
