//! A plugin's declared capability needs.

use crate::capability::Capability;
use crate::capability_set::CapabilitySet;
use crate::policy::{Decision, Policy};

/// A single declared need: a capability, why the plugin wants it, and
/// whether the plugin can run without it.
#[derive(Debug, Clone)]
pub struct Requirement {
    pub capability: Capability,
    pub justification: String,
    pub optional: bool,
}

impl Requirement {
    pub fn required(capability: Capability, justification: impl Into<String>) -> Self {
        Self {
            capability,
            justification: justification.into(),
            optional: false,
        }
    }

    pub fn optional(capability: Capability, justification: impl Into<String>) -> Self {
        Self {
            capability,
            justification: justification.into(),
            optional: true,
        }
    }
}

/// An ordered sequence of requirements; insertion order is preserved and
/// duplicates are allowed (though discouraged — callers author manifests,
/// not this crate).
#[derive(Debug, Clone, Default)]
pub struct Requirements {
    items: Vec<Requirement>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, requirement: Requirement) {
        self.items.push(requirement);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn required_only(&self) -> Vec<&Requirement> {
        self.items.iter().filter(|r| !r.optional).collect()
    }

    pub fn optional_only(&self) -> Vec<&Requirement> {
        self.items.iter().filter(|r| r.optional).collect()
    }

    pub fn dangerous_only(&self) -> Vec<&Requirement> {
        self.items.iter().filter(|r| r.capability.is_dangerous()).collect()
    }

    /// The full set of requested capabilities, for feeding to `Policy`.
    pub fn as_set(&self) -> CapabilitySet {
        self.items.iter().map(|r| r.capability.clone()).collect()
    }

    /// Same as `as_set`, restricted to non-optional requirements — the set
    /// that must validate for the plugin to be allowed to run at all.
    pub fn required_as_set(&self) -> CapabilitySet {
        self.required_only()
            .into_iter()
            .map(|r| r.capability.clone())
            .collect()
    }

    /// Checks every requirement against `policy`, in declaration order, and
    /// buckets each into allowed, pending approval, or denied.
    ///
    /// This is a finer-grained check than `Policy::validate` on a raw set:
    /// a capability needing approval is not a denial here, since the caller
    /// may still prompt the user and proceed. The result is valid iff
    /// `denied` is empty; `pending` does not invalidate but does require
    /// user interaction before the plugin runs unattended.
    pub fn validate_against(&self, policy: &Policy) -> RequirementValidation {
        let mut allowed = Vec::new();
        let mut pending = Vec::new();
        let mut denied = Vec::new();

        for requirement in &self.items {
            match policy.check(&requirement.capability) {
                Decision::Allowed => allowed.push(requirement.capability.clone()),
                Decision::NeedsApproval => pending.push(requirement.capability.clone()),
                Decision::Blocked | Decision::NotGranted => {
                    let reason = policy
                        .check_result(&requirement.capability)
                        .expect_err("non-allowed decision always carries an error")
                        .to_string();
                    denied.push(Denial {
                        capability: requirement.capability.clone(),
                        reason,
                    });
                }
            }
        }

        RequirementValidation {
            allowed,
            pending,
            denied,
        }
    }
}

/// One requirement the policy refused to grant, with the policy's own
/// denial text (blocked or not-granted) carried verbatim.
#[derive(Debug, Clone)]
pub struct Denial {
    pub capability: Capability,
    pub reason: String,
}

/// The bucketed outcome of checking a plugin's requirements against a
/// policy: allowed capabilities may be used immediately, pending ones need
/// user approval before use, and denied ones make the plugin invalid to run
/// at all.
#[derive(Debug, Clone, Default)]
pub struct RequirementValidation {
    pub allowed: Vec<Capability>,
    pub pending: Vec<Capability>,
    pub denied: Vec<Denial>,
}

impl RequirementValidation {
    /// Valid iff there are no hard denials; pending approvals do not
    /// invalidate the result.
    pub fn is_valid(&self) -> bool {
        self.denied.is_empty()
    }

    pub fn needs_approval(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Category;

    #[test]
    fn buckets_by_optional_flag() {
        let mut reqs = Requirements::new();
        reqs.push(Requirement::required(
            Capability::new(Category::Files, "read"),
            "read config",
        ));
        reqs.push(Requirement::optional(
            Capability::new(Category::Shell, "execute"),
            "run setup",
        ));

        assert_eq!(reqs.required_only().len(), 1);
        assert_eq!(reqs.optional_only().len(), 1);
        assert_eq!(reqs.dangerous_only().len(), 1);
    }

    #[test]
    fn preserves_insertion_order() {
        let mut reqs = Requirements::new();
        reqs.push(Requirement::required(Capability::new(Category::Files, "read"), "a"));
        reqs.push(Requirement::required(Capability::new(Category::Network, "fetch"), "b"));
        let justs: Vec<_> = reqs.iter().map(|r| r.justification.clone()).collect();
        assert_eq!(justs, vec!["a", "b"]);
    }

    #[test]
    fn validate_against_buckets_dangerous_capability_as_pending_not_denied() {
        let policy = Policy::builder()
            .grant(Capability::new(Category::Files, "read"))
            .grant(Capability::new(Category::Shell, "execute"))
            .require_approval(true)
            .build();

        let mut reqs = Requirements::new();
        reqs.push(Requirement::required(Capability::new(Category::Files, "read"), "read config"));
        reqs.push(Requirement::required(Capability::new(Category::Shell, "execute"), "run setup"));

        let result = reqs.validate_against(&policy);
        assert!(result.is_valid());
        assert!(result.needs_approval());
        assert_eq!(result.pending.len(), 1);
        assert_eq!(result.denied.len(), 0);
    }

    #[test]
    fn validate_against_approval_clears_pending() {
        let mut policy = Policy::builder()
            .grant(Capability::new(Category::Shell, "execute"))
            .require_approval(true)
            .build();
        let mut reqs = Requirements::new();
        reqs.push(Requirement::required(Capability::new(Category::Shell, "execute"), "run setup"));

        assert!(reqs.validate_against(&policy).needs_approval());
        policy.approve(Capability::new(Category::Shell, "execute"));
        assert!(!reqs.validate_against(&policy).needs_approval());
    }

    #[test]
    fn validate_against_reports_not_granted_as_denial() {
        let policy = Policy::builder().build();
        let mut reqs = Requirements::new();
        reqs.push(Requirement::required(Capability::new(Category::Network, "fetch"), "download"));

        let result = reqs.validate_against(&policy);
        assert!(!result.is_valid());
        assert_eq!(result.denied.len(), 1);
        assert!(result.denied[0].reason.contains("not granted"));
    }
}
