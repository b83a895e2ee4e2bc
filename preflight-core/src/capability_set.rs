//! An unordered, deduplicated collection of capabilities.

use std::collections::BTreeMap;

use crate::capability::{Capability, Category};

/// A set of capabilities keyed by their cached string form.
///
/// Backed by a `BTreeMap` rather than a `HashMap` so that `list()` is
/// lexicographically sorted for free, matching the determinism invariant:
/// textual exports must be stable across runs.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    entries: BTreeMap<String, Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter(caps: impl IntoIterator<Item = Capability>) -> Self {
        let mut set = Self::new();
        for cap in caps {
            set.add(cap);
        }
        set
    }

    /// Adds a capability, ignoring the zero capability and duplicates
    /// (by string form).
    pub fn add(&mut self, cap: Capability) {
        if cap.is_zero() {
            return;
        }
        self.entries.insert(cap.as_str().to_string(), cap);
    }

    pub fn remove(&mut self, cap: &Capability) {
        self.entries.remove(cap.as_str());
    }

    /// Exact membership: the set contains a capability with this precise
    /// string form.
    pub fn has(&self, cap: &Capability) -> bool {
        self.entries.contains_key(cap.as_str())
    }

    /// True iff any stored capability wildcard-matches the argument.
    pub fn matches(&self, cap: &Capability) -> bool {
        self.entries.values().any(|stored| stored.matches(cap))
    }

    pub fn any_has(&self, caps: impl IntoIterator<Item = Capability>) -> bool {
        caps.into_iter().any(|c| self.has(&c))
    }

    pub fn all_has(&self, caps: impl IntoIterator<Item = Capability>) -> bool {
        caps.into_iter().all(|c| self.has(&c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted (lexicographic by string form), copied list of the set's
    /// members.
    pub fn list(&self) -> Vec<Capability> {
        self.entries.values().cloned().collect()
    }

    /// Union; nil-safe in spirit (an absent `other` is just an empty set in
    /// Rust, so this is simply total).
    pub fn union(&self, other: &CapabilitySet) -> CapabilitySet {
        let mut result = self.clone();
        for cap in other.list() {
            result.add(cap);
        }
        result
    }

    pub fn intersection(&self, other: &CapabilitySet) -> CapabilitySet {
        let mut result = CapabilitySet::new();
        for cap in self.list() {
            if other.has(&cap) {
                result.add(cap);
            }
        }
        result
    }

    pub fn difference(&self, other: &CapabilitySet) -> CapabilitySet {
        let mut result = CapabilitySet::new();
        for cap in self.list() {
            if !other.has(&cap) {
                result.add(cap);
            }
        }
        result
    }

    /// Groups the set's members by category, each group sorted as the parent
    /// set is.
    pub fn by_category(&self) -> BTreeMap<&'static str, Vec<Capability>> {
        let mut grouped: BTreeMap<&'static str, Vec<Capability>> = BTreeMap::new();
        for cap in self.list() {
            grouped
                .entry(category_key(cap.category()))
                .or_default()
                .push(cap);
        }
        grouped
    }

    /// The dangerous members of this set.
    pub fn dangerous(&self) -> Vec<Capability> {
        self.list().into_iter().filter(|c| c.is_dangerous()).collect()
    }
}

fn category_key(category: Category) -> &'static str {
    match category {
        Category::Files => "files",
        Category::Packages => "packages",
        Category::Shell => "shell",
        Category::Network => "network",
        Category::Secrets => "secrets",
        Category::System => "system",
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        CapabilitySet::from_iter(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(category: Category, action: &str) -> Capability {
        Capability::new(category, action)
    }

    #[test]
    fn add_and_remove_roundtrip() {
        let mut set = CapabilitySet::new();
        let c = cap(Category::Files, "read");
        set.add(c.clone());
        assert!(set.has(&c));
        set.remove(&c);
        assert!(!set.has(&c));
    }

    #[test]
    fn add_ignores_zero_capability() {
        let mut set = CapabilitySet::new();
        set.add(Capability::zero());
        assert!(set.is_empty());
    }

    #[test]
    fn add_deduplicates_by_string_form() {
        let mut set = CapabilitySet::new();
        set.add(cap(Category::Files, "read"));
        set.add(cap(Category::Files, "read"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn list_is_lexicographically_sorted() {
        let mut set = CapabilitySet::new();
        set.add(cap(Category::Shell, "execute"));
        set.add(cap(Category::Files, "read"));
        set.add(cap(Category::Network, "fetch"));
        let list = set.list();
        let strings: Vec<_> = list.iter().map(|c| c.as_str().to_string()).collect();
        let mut sorted = strings.clone();
        sorted.sort();
        assert_eq!(strings, sorted);
    }

    #[test]
    fn set_algebra_properties() {
        let a: CapabilitySet = [cap(Category::Files, "read"), cap(Category::Files, "write")]
            .into_iter()
            .collect();
        let b: CapabilitySet = [cap(Category::Files, "write"), cap(Category::Network, "fetch")]
            .into_iter()
            .collect();

        let union = a.union(&b);
        assert!(union.len() >= a.len().max(b.len()));

        let intersection = a.intersection(&b);
        for c in intersection.list() {
            assert!(a.has(&c) && b.has(&c));
        }

        let difference = a.difference(&b);
        for c in difference.list() {
            assert!(!b.has(&c));
        }
    }

    #[test]
    fn nil_other_behaves_as_empty() {
        let a: CapabilitySet = [cap(Category::Files, "read")].into_iter().collect();
        let empty = CapabilitySet::new();
        assert_eq!(a.union(&empty).len(), a.len());
        assert_eq!(a.intersection(&empty).len(), 0);
        assert_eq!(a.difference(&empty).len(), a.len());
    }

    #[test]
    fn wildcard_matches_checks_stored_members() {
        let mut set = CapabilitySet::new();
        set.add(cap(Category::Files, "*"));
        assert!(set.matches(&cap(Category::Files, "read")));
        assert!(!set.matches(&cap(Category::Network, "fetch")));
    }

    #[test]
    fn by_category_groups_members() {
        let set: CapabilitySet = [cap(Category::Files, "read"), cap(Category::Shell, "execute")]
            .into_iter()
            .collect();
        let grouped = set.by_category();
        assert_eq!(grouped.get("files").unwrap().len(), 1);
        assert_eq!(grouped.get("shell").unwrap().len(), 1);
    }
}
