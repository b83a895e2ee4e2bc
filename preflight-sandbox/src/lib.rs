//! WebAssembly execution for preflight plugins: compiles and runs the
//! modules `preflight-core` has already decided are allowed to run.
//!
//! `preflight-core` answers "is this plugin allowed to do X"; this crate
//! answers "how do we actually run it, and how do we stop it from doing
//! anything X wasn't granted." Read order: `services` (what a plugin can
//! touch), `runtime` (the engine and the gated host functions), `sandbox`
//! (one validated execution session), `loader` (reading plugins off disk),
//! `executor` (the thing callers actually hold).

pub mod error;
pub mod executor;
pub mod loader;
pub mod runtime;
pub mod sandbox;
pub mod services;

pub use error::SandboxError;
pub use executor::Executor;
pub use loader::{DiscoveredPlugin, Loader};
pub use runtime::Runtime;
pub use sandbox::Sandbox;
pub use services::{
    FileSystem, HostServices, HttpClient, Logger, PackageManager, Shell,
    isolated_services, LocalFileSystem, ServiceError,
};
