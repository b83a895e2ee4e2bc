//! Grant/block/approve decisions and the dangerous-capability approval flow.

use crate::capability::Capability;
use crate::capability_set::CapabilitySet;
use crate::error::CoreError;

/// The four-way outcome of evaluating a single capability against a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Denied because a blocked capability wildcard-matched it. Blocking
    /// dominates granting.
    Blocked,
    /// Denied because no granted capability wildcard-matches it.
    NotGranted,
    /// The capability is dangerous, approval is required, and it has not
    /// been approved yet.
    NeedsApproval,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// The triple (granted, blocked, approved) plus the approval-required flag.
///
/// Immutable after construction except for `approve` / `approve_all`, which
/// only ever grow `approved`. Read-only sharing by reference across
/// concurrent sandbox executions is therefore safe without locking.
#[derive(Debug, Clone)]
pub struct Policy {
    granted: CapabilitySet,
    blocked: CapabilitySet,
    approved: CapabilitySet,
    require_approval: bool,
}

impl Policy {
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::new()
    }

    /// The decision function, evaluated in the order the spec fixes:
    /// blocked dominates, then not-granted, then needs-approval, else
    /// allowed.
    pub fn check(&self, capability: &Capability) -> Decision {
        if self.blocked.matches(capability) {
            return Decision::Blocked;
        }
        if !self.granted.matches(capability) {
            return Decision::NotGranted;
        }
        if capability.is_dangerous() && self.require_approval && !self.approved.has(capability) {
            return Decision::NeedsApproval;
        }
        Decision::Allowed
    }

    /// Same decision function, returned as a `Result` for callers that want
    /// `?`-propagation; short-circuits on the first non-allowed capability.
    pub fn check_result(&self, capability: &Capability) -> Result<(), CoreError> {
        match self.check(capability) {
            Decision::Allowed => Ok(()),
            Decision::Blocked => Err(CoreError::CapabilityBlocked {
                capability: capability.to_string(),
            }),
            Decision::NotGranted => Err(CoreError::CapabilityNotGranted {
                capability: capability.to_string(),
            }),
            Decision::NeedsApproval => Err(CoreError::RequiresApproval {
                capability: capability.to_string(),
            }),
        }
    }

    /// Checks every capability in `cs`, short-circuiting on the first
    /// non-allowed one.
    pub fn check_all(&self, cs: &CapabilitySet) -> Result<(), CoreError> {
        for cap in cs.list() {
            self.check_result(&cap)?;
        }
        Ok(())
    }

    /// Enumerates `requested` in sorted order and collects one violation per
    /// non-allowed capability, distinguishing blocked (dominates) from
    /// not-granted. Capabilities needing approval are not violations here —
    /// validation of a raw set is a coarser check than `Requirements`
    /// validation (§4.3), which buckets pending separately.
    pub fn validate(&self, requested: &CapabilitySet) -> Vec<CoreError> {
        requested
            .list()
            .into_iter()
            .filter_map(|cap| self.check_result(&cap).err())
            .filter(|e| e.is_denial())
            .collect()
    }

    /// Effective set: granted minus blocked.
    pub fn effective(&self) -> CapabilitySet {
        self.granted.difference(&self.blocked)
    }

    /// Dangerous members of `granted` not yet in `approved` and not
    /// `blocked`; empty whenever `require_approval` is false.
    pub fn pending_approval(&self) -> CapabilitySet {
        if !self.require_approval {
            return CapabilitySet::new();
        }
        self.granted
            .dangerous()
            .into_iter()
            .filter(|c| !self.approved.has(c) && !self.blocked.matches(c))
            .collect()
    }

    pub fn approve(&mut self, capability: Capability) {
        self.approved.add(capability);
    }

    /// Promotes every currently pending dangerous capability into `approved`.
    pub fn approve_all(&mut self) {
        for cap in self.pending_approval().list() {
            self.approved.add(cap);
        }
    }

    pub fn require_approval(&self) -> bool {
        self.require_approval
    }

    pub fn granted(&self) -> &CapabilitySet {
        &self.granted
    }

    pub fn blocked(&self) -> &CapabilitySet {
        &self.blocked
    }

    pub fn approved(&self) -> &CapabilitySet {
        &self.approved
    }
}

/// Assembles a `Policy`. String-based helpers silently skip tokens that fail
/// to parse — a deliberate UX concession for administrator-authored
/// configuration files, where a typo should not abort the whole load.
/// Capability-value helpers never skip.
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    granted: CapabilitySet,
    blocked: CapabilitySet,
    approved: CapabilitySet,
    require_approval: bool,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self {
            require_approval: true,
            ..Default::default()
        }
    }

    pub fn grant(mut self, capability: Capability) -> Self {
        self.granted.add(capability);
        self
    }

    pub fn grant_many(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        for cap in capabilities {
            self.granted.add(cap);
        }
        self
    }

    /// Parses each token; unparseable tokens are silently dropped rather than
    /// aborting the build, matching the policy rule documented on the type.
    pub fn grant_strings(mut self, tokens: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        for token in tokens {
            if let Ok(cap) = Capability::parse(token.as_ref()) {
                self.granted.add(cap);
            }
        }
        self
    }

    pub fn block(mut self, capability: Capability) -> Self {
        self.blocked.add(capability);
        self
    }

    pub fn block_many(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        for cap in capabilities {
            self.blocked.add(cap);
        }
        self
    }

    pub fn block_strings(mut self, tokens: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        for token in tokens {
            if let Ok(cap) = Capability::parse(token.as_ref()) {
                self.blocked.add(cap);
            }
        }
        self
    }

    pub fn approve(mut self, capability: Capability) -> Self {
        self.approved.add(capability);
        self
    }

    pub fn require_approval(mut self, required: bool) -> Self {
        self.require_approval = required;
        self
    }

    pub fn build(self) -> Policy {
        Policy {
            granted: self.granted,
            blocked: self.blocked,
            approved: self.approved,
            require_approval: self.require_approval,
        }
    }
}

/// Grants file read/write, the five recognized package managers, and
/// network fetch. Grants no dangerous capability. Approval required.
pub fn default_policy() -> Policy {
    use crate::capability::Category;
    Policy::builder()
        .grant(Capability::new(Category::Files, "read"))
        .grant(Capability::new(Category::Files, "write"))
        .grant(Capability::new(Category::Packages, "brew"))
        .grant(Capability::new(Category::Packages, "apt"))
        .grant(Capability::new(Category::Packages, "dnf"))
        .grant(Capability::new(Category::Packages, "pacman"))
        .grant(Capability::new(Category::Packages, "apk"))
        .grant(Capability::new(Category::Network, "fetch"))
        .require_approval(true)
        .build()
}

/// Grants every well-known capability (wildcard per category). Disables the
/// approval gate entirely.
pub fn full_access_policy() -> Policy {
    use crate::capability::Category;
    Policy::builder()
        .grant(Capability::new(Category::Files, "*"))
        .grant(Capability::new(Category::Packages, "*"))
        .grant(Capability::new(Category::Shell, "*"))
        .grant(Capability::new(Category::Network, "*"))
        .grant(Capability::new(Category::Secrets, "*"))
        .grant(Capability::new(Category::System, "*"))
        .require_approval(false)
        .build()
}

/// Grants only file read and network fetch; explicitly blocks shell execute,
/// secrets read/write, and system modify. Approval required.
pub fn restricted_policy() -> Policy {
    use crate::capability::Category;
    Policy::builder()
        .grant(Capability::new(Category::Files, "read"))
        .grant(Capability::new(Category::Network, "fetch"))
        .block(Capability::new(Category::Shell, "execute"))
        .block(Capability::new(Category::Secrets, "read"))
        .block(Capability::new(Category::Secrets, "write"))
        .block(Capability::new(Category::System, "modify"))
        .require_approval(true)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Category;

    fn cap(category: Category, action: &str) -> Capability {
        Capability::new(category, action)
    }

    #[test]
    fn empty_policy_denies_everything() {
        let policy = Policy::builder().build();
        assert_eq!(policy.check(&cap(Category::Files, "read")), Decision::NotGranted);
    }

    #[test]
    fn blocked_dominates_granted() {
        let policy = Policy::builder()
            .grant(cap(Category::Shell, "execute"))
            .block(cap(Category::Shell, "execute"))
            .build();
        assert_eq!(policy.check(&cap(Category::Shell, "execute")), Decision::Blocked);
    }

    #[test]
    fn blocked_wildcard_vetoes_whole_category() {
        let policy = Policy::builder()
            .grant(cap(Category::Files, "read"))
            .block(cap(Category::Files, "*"))
            .build();
        assert_eq!(policy.check(&cap(Category::Files, "read")), Decision::Blocked);
    }

    #[test]
    fn dangerous_capability_needs_approval_until_approved() {
        let mut policy = Policy::builder()
            .grant(cap(Category::Files, "read"))
            .grant(cap(Category::Shell, "execute"))
            .require_approval(true)
            .build();

        assert_eq!(
            policy.check(&cap(Category::Shell, "execute")),
            Decision::NeedsApproval
        );

        policy.approve(cap(Category::Shell, "execute"));
        assert_eq!(policy.check(&cap(Category::Shell, "execute")), Decision::Allowed);
    }

    #[test]
    fn approve_all_promotes_every_pending_capability() {
        let mut policy = Policy::builder()
            .grant(cap(Category::Shell, "execute"))
            .grant(cap(Category::Secrets, "read"))
            .require_approval(true)
            .build();

        assert_eq!(policy.pending_approval().len(), 2);
        policy.approve_all();
        assert!(policy.pending_approval().is_empty());
    }

    #[test]
    fn require_approval_false_empties_pending() {
        let policy = Policy::builder()
            .grant(cap(Category::Shell, "execute"))
            .require_approval(false)
            .build();
        assert!(policy.pending_approval().is_empty());
        assert_eq!(policy.check(&cap(Category::Shell, "execute")), Decision::Allowed);
    }

    #[test]
    fn effective_is_granted_minus_blocked() {
        let policy = Policy::builder()
            .grant(cap(Category::Files, "read"))
            .grant(cap(Category::Network, "fetch"))
            .block(cap(Category::Network, "fetch"))
            .build();
        let effective = policy.effective();
        assert!(effective.has(&cap(Category::Files, "read")));
        assert!(!effective.has(&cap(Category::Network, "fetch")));
    }

    #[test]
    fn grant_strings_silently_skips_unparseable_tokens() {
        let policy = PolicyBuilder::new()
            .grant_strings(["files:read", "not-a-capability", "bogus-category:x"])
            .build();
        assert!(policy.granted().has(&cap(Category::Files, "read")));
        assert_eq!(policy.granted().len(), 1);
    }

    #[test]
    fn default_policy_grants_safe_capabilities_only() {
        let policy = default_policy();
        assert!(policy.check(&cap(Category::Files, "read")).is_allowed());
        assert_eq!(
            policy.check(&cap(Category::Shell, "execute")),
            Decision::NotGranted
        );
    }

    #[test]
    fn full_access_policy_disables_approval_gate() {
        let policy = full_access_policy();
        assert!(policy.check(&cap(Category::Shell, "execute")).is_allowed());
        assert!(policy.check(&cap(Category::System, "modify")).is_allowed());
    }

    #[test]
    fn restricted_policy_blocks_dangerous_capabilities() {
        let policy = restricted_policy();
        assert_eq!(
            policy.check(&cap(Category::Shell, "execute")),
            Decision::Blocked
        );
        assert!(policy.check(&cap(Category::Files, "read")).is_allowed());
    }

    #[test]
    fn validate_distinguishes_blocked_from_not_granted() {
        let policy = Policy::builder()
            .block(cap(Category::Shell, "execute"))
            .build();
        let requested: CapabilitySet =
            [cap(Category::Shell, "execute"), cap(Category::Files, "read")]
                .into_iter()
                .collect();
        let violations = policy.validate(&requested);
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|e| matches!(e, CoreError::CapabilityBlocked { .. })));
        assert!(violations
            .iter()
            .any(|e| matches!(e, CoreError::CapabilityNotGranted { .. })));
    }
}
