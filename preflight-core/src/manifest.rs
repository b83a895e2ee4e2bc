//! Plugin manifests: the YAML descriptor shipped alongside a compiled
//! module, and the loaded `Plugin` it resolves to.

use sha2::{Digest, Sha256};

use crate::capability::Capability;
use crate::error::CoreError;
use crate::requirement::{Requirement, Requirements};

/// One capability entry as it appears in a manifest's `capabilities:` list.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestCapability {
    pub name: String,
    pub justification: String,
    #[serde(default)]
    pub optional: bool,
}

/// The deserialized form of a plugin's `manifest.yaml`.
///
/// ```yaml
/// id: homebrew-installer
/// name: Homebrew Installer
/// version: "1.0.0"
/// description: Installs packages via Homebrew
/// author: preflight
/// module: plugin.wasm
/// checksum: "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
/// capabilities:
///   - name: packages:brew
///     justification: install formulae
/// ```
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    pub module: String,
    pub checksum: String,
    #[serde(default)]
    pub capabilities: Vec<ManifestCapability>,
}

impl PluginManifest {
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::ManifestInvalid(format!("invalid manifest YAML: {e}")))
    }

    /// Structural validity: the fields required to locate and trust a
    /// module are non-empty, and every declared capability token parses.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::ManifestInvalid("manifest id is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::ManifestInvalid("manifest name is empty".into()));
        }
        if self.module.trim().is_empty() {
            return Err(CoreError::ManifestInvalid(
                "manifest module path is empty".into(),
            ));
        }
        if self.checksum.trim().is_empty() {
            return Err(CoreError::ManifestInvalid(
                "manifest checksum is empty".into(),
            ));
        }
        for entry in &self.capabilities {
            Capability::parse(&entry.name).map_err(|e| {
                CoreError::ManifestInvalid(format!(
                    "capability {:?}: {e}",
                    entry.name
                ))
            })?;
        }
        Ok(())
    }

    /// Converts the manifest's capability entries into `Requirements`,
    /// dropping nothing — parse failures were already caught by `validate`.
    pub fn requirements(&self) -> Result<Requirements, CoreError> {
        let mut reqs = Requirements::new();
        for entry in &self.capabilities {
            let cap = Capability::parse(&entry.name)?;
            let requirement = if entry.optional {
                Requirement::optional(cap, entry.justification.clone())
            } else {
                Requirement::required(cap, entry.justification.clone())
            };
            reqs.push(requirement);
        }
        Ok(reqs)
    }
}

/// A fully loaded plugin: manifest metadata, the compiled module bytes, and
/// the parsed requirement set, ready to hand to the sandbox.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub id: String,
    pub name: String,
    pub version: String,
    pub module_bytes: Vec<u8>,
    pub requirements: Requirements,
    pub expected_checksum: String,
}

impl Plugin {
    pub fn from_manifest(manifest: &PluginManifest, module_bytes: Vec<u8>) -> Result<Self, CoreError> {
        manifest.validate()?;
        Ok(Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            module_bytes,
            requirements: manifest.requirements()?,
            expected_checksum: manifest.checksum.to_lowercase(),
        })
    }

    /// Computes the SHA-256 of `module_bytes` and compares it, case-
    /// insensitively, against the manifest's declared checksum. This is the
    /// primary supply-chain defense: a module whose bytes were tampered
    /// with after the manifest was authored fails to load.
    pub fn verify_integrity(&self) -> Result<(), CoreError> {
        let mut hasher = Sha256::new();
        hasher.update(&self.module_bytes);
        let actual = hex_encode(&hasher.finalize());
        if actual != self.expected_checksum {
            return Err(CoreError::ChecksumMismatch {
                expected: self.expected_checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out.to_lowercase()
}
