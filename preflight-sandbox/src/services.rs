//! Host service abstractions the sandbox dispatches gated host-function
//! calls to, plus the null implementations used for full isolation.
//!
//! None of these traits enforce policy themselves — `HostServices::check_capability`
//! is the single gate, consulted by the runtime before a dispatch ever reaches
//! a service implementation (§4.6). A service that happened to enforce its
//! own policy would just be a second, divergent source of truth.

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use preflight_core::{Capability, Policy};
use thiserror::Error;

/// An operation a host service refused to perform.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("denied: {0}")]
    Denied(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

pub trait FileSystem: Send + Sync {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, ServiceError>;
    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), ServiceError>;
    fn exists(&self, path: &str) -> bool;
    fn remove(&self, path: &str) -> Result<(), ServiceError>;
}

pub trait PackageManager: Send + Sync {
    fn install(&self, name: &str) -> Result<(), ServiceError>;
    fn list(&self) -> Result<Vec<String>, ServiceError>;
    fn is_installed(&self, name: &str) -> bool;
}

pub trait Shell: Send + Sync {
    fn exec(&self, cmd: &str, args: &[String]) -> Result<(Vec<u8>, i32), ServiceError>;
    fn exec_with_input(
        &self,
        stdin: &mut dyn Read,
        cmd: &str,
        args: &[String],
    ) -> Result<(Vec<u8>, i32), ServiceError>;
}

pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str) -> Result<(Vec<u8>, u16), ServiceError>;
    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<(Vec<u8>, u16), ServiceError>;
}

pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Denies (or returns empty/false for queries) every operation. Used to
/// build `IsolatedServices`, the bundle full-isolation mode runs plugins
/// against.
pub struct NullFileSystem;
impl FileSystem for NullFileSystem {
    fn read_file(&self, _path: &str) -> Result<Vec<u8>, ServiceError> {
        Err(ServiceError::Denied("filesystem access is disabled".into()))
    }
    fn write_file(&self, _path: &str, _data: &[u8]) -> Result<(), ServiceError> {
        Err(ServiceError::Denied("filesystem access is disabled".into()))
    }
    fn exists(&self, _path: &str) -> bool {
        false
    }
    fn remove(&self, _path: &str) -> Result<(), ServiceError> {
        Err(ServiceError::Denied("filesystem access is disabled".into()))
    }
}

pub struct NullPackageManager;
impl PackageManager for NullPackageManager {
    fn install(&self, _name: &str) -> Result<(), ServiceError> {
        Err(ServiceError::Denied("package installation is disabled".into()))
    }
    fn list(&self) -> Result<Vec<String>, ServiceError> {
        Ok(Vec::new())
    }
    fn is_installed(&self, _name: &str) -> bool {
        false
    }
}

pub struct NullShell;
impl Shell for NullShell {
    fn exec(&self, _cmd: &str, _args: &[String]) -> Result<(Vec<u8>, i32), ServiceError> {
        Err(ServiceError::Denied("shell execution is disabled".into()))
    }
    fn exec_with_input(
        &self,
        _stdin: &mut dyn Read,
        _cmd: &str,
        _args: &[String],
    ) -> Result<(Vec<u8>, i32), ServiceError> {
        Err(ServiceError::Denied("shell execution is disabled".into()))
    }
}

pub struct NullHttpClient;
impl HttpClient for NullHttpClient {
    fn get(&self, _url: &str) -> Result<(Vec<u8>, u16), ServiceError> {
        Err(ServiceError::Denied("network access is disabled".into()))
    }
    fn post(&self, _url: &str, _content_type: &str, _body: &[u8]) -> Result<(Vec<u8>, u16), ServiceError> {
        Err(ServiceError::Denied("network access is disabled".into()))
    }
}

/// Discards every message; the default logger when the caller supplies none.
pub struct NullLogger;
impl Logger for NullLogger {
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// A real, non-null `FileSystem` confined to a configured root directory
/// (§11.1). Every path argument is resolved against the root and rejected
/// if the resolution escapes it, the same way the rest of this codebase
/// refuses path traversal before touching real `std::fs`.
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `path` against the confined root, rejecting absolute paths
    /// and any `..` component that would escape it, then canonicalizes the
    /// nearest existing ancestor and checks it is still contained in the
    /// root — a lexical check alone would miss a symlink planted inside the
    /// root that points outside it. Does not require the target itself to
    /// exist (so `write_file` can create new files).
    fn resolve(&self, path: &str) -> Result<PathBuf, ServiceError> {
        let requested = Path::new(path);
        if requested.is_absolute() {
            return Err(ServiceError::Denied(format!(
                "absolute path {path:?} is not permitted"
            )));
        }
        let mut resolved = self.root.clone();
        for component in requested.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(ServiceError::Denied(format!(
                        "path {path:?} escapes the confined root via '..'"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ServiceError::Denied(format!(
                        "path {path:?} is not permitted"
                    )));
                }
            }
        }
        if !resolved.starts_with(&self.root) {
            return Err(ServiceError::Denied(format!(
                "path {path:?} escapes the confined root"
            )));
        }

        let root_canonical = self.root.canonicalize()?;
        let mut existing_ancestor = resolved.as_path();
        while !existing_ancestor.exists() {
            match existing_ancestor.parent() {
                Some(parent) => existing_ancestor = parent,
                None => break,
            }
        }
        let ancestor_canonical = existing_ancestor.canonicalize()?;
        if !ancestor_canonical.starts_with(&root_canonical) {
            return Err(ServiceError::Denied(format!(
                "path {path:?} escapes the confined root via a symlink"
            )));
        }

        Ok(resolved)
    }
}

impl FileSystem for LocalFileSystem {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, ServiceError> {
        let resolved = self.resolve(path)?;
        Ok(std::fs::read(resolved)?)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), ServiceError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(resolved, data)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn remove(&self, path: &str) -> Result<(), ServiceError> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            std::fs::remove_dir_all(resolved)?;
        } else {
            std::fs::remove_file(resolved)?;
        }
        Ok(())
    }
}

/// The bundle of host services the runtime dispatches gated host-function
/// calls to, plus the policy gate every dispatch passes through first.
///
/// `check_capability` is the single enforcement point: services themselves
/// are never trusted to enforce policy (§4.6).
pub struct HostServices {
    pub filesystem: Arc<dyn FileSystem>,
    pub packages: Arc<dyn PackageManager>,
    pub shell: Arc<dyn Shell>,
    pub http: Arc<dyn HttpClient>,
    pub logger: Arc<dyn Logger>,
    policy: Option<Arc<Policy>>,
}

impl HostServices {
    pub fn new(
        filesystem: Arc<dyn FileSystem>,
        packages: Arc<dyn PackageManager>,
        shell: Arc<dyn Shell>,
        http: Arc<dyn HttpClient>,
        logger: Arc<dyn Logger>,
        policy: Option<Arc<Policy>>,
    ) -> Self {
        Self {
            filesystem,
            packages,
            shell,
            http,
            logger,
            policy,
        }
    }

    /// Delegates to `policy.check` when a policy is configured; with no
    /// policy, every capability is permitted (the caller opted out of
    /// enforcement at the config layer, not at this gate).
    pub fn check_capability(&self, capability: &Capability) -> preflight_core::Decision {
        match &self.policy {
            Some(policy) => policy.check(capability),
            None => preflight_core::Decision::Allowed,
        }
    }

    pub fn policy(&self) -> Option<&Arc<Policy>> {
        self.policy.as_ref()
    }

    /// Clones the service bundle (the trait objects are `Arc`s, so this is
    /// cheap) with a different policy substituted in. Used to fold the
    /// config-layer `allow_network`/`allow_filesystem` switches into the
    /// policy actually consulted at dispatch time, without mutating the
    /// bundle a caller already built.
    pub fn with_policy(&self, policy: Option<Arc<Policy>>) -> HostServices {
        HostServices {
            filesystem: Arc::clone(&self.filesystem),
            packages: Arc::clone(&self.packages),
            shell: Arc::clone(&self.shell),
            http: Arc::clone(&self.http),
            logger: Arc::clone(&self.logger),
            policy,
        }
    }
}

/// The null-implementation bundle used in full-isolation mode: every
/// capability-bearing service denies, the logger discards, and the
/// supplied policy (if any) still gates the decision reported to the
/// caller even though no operation could succeed regardless.
pub fn isolated_services(policy: Option<Arc<Policy>>) -> HostServices {
    HostServices::new(
        Arc::new(NullFileSystem),
        Arc::new(NullPackageManager),
        Arc::new(NullShell),
        Arc::new(NullHttpClient),
        Arc::new(NullLogger),
        policy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use preflight_core::Category;

    #[test]
    fn null_filesystem_denies_every_operation() {
        let fs = NullFileSystem;
        assert!(fs.read_file("x").is_err());
        assert!(fs.write_file("x", b"y").is_err());
        assert!(!fs.exists("x"));
        assert!(fs.remove("x").is_err());
    }

    #[test]
    fn local_filesystem_confines_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());
        fs.write_file("notes.txt", b"hello").unwrap();
        assert_eq!(fs.read_file("notes.txt").unwrap(), b"hello");
        assert!(fs.exists("notes.txt"));
    }

    #[test]
    fn local_filesystem_rejects_parent_escape() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());
        assert!(fs.read_file("../escape.txt").is_err());
        assert!(fs.write_file("../../etc/passwd", b"x").is_err());
    }

    #[test]
    fn local_filesystem_rejects_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());
        assert!(fs.read_file("/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn local_filesystem_rejects_a_symlink_that_escapes_the_root() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"top secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("escape")).unwrap();

        let fs = LocalFileSystem::new(root.path());
        assert!(fs.read_file("escape/secret.txt").is_err());
        assert!(fs.write_file("escape/secret.txt", b"pwned").is_err());
        assert_eq!(
            std::fs::read(outside.path().join("secret.txt")).unwrap(),
            b"top secret"
        );
    }

    #[test]
    fn check_capability_permits_everything_with_no_policy() {
        let services = isolated_services(None);
        assert!(services
            .check_capability(&preflight_core::Capability::new(Category::Shell, "execute"))
            .is_allowed());
    }

    #[test]
    fn check_capability_defers_to_policy_when_present() {
        let policy = Arc::new(Policy::builder().build());
        let services = isolated_services(Some(policy));
        assert!(!services
            .check_capability(&preflight_core::Capability::new(Category::Files, "read"))
            .is_allowed());
    }
}
