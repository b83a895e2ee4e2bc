//! Capability identifiers: `category:action` permission tokens.

use std::fmt;

use crate::error::CoreError;

/// The fixed, closed set of capability categories.
///
/// Actions within a category are unconstrained strings so that, e.g., package
/// managers can appear as `packages:brew`, `packages:apt`, without the
/// category enum growing with every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Files,
    Packages,
    Shell,
    Network,
    Secrets,
    System,
}

impl Category {
    fn as_str(&self) -> &'static str {
        match self {
            Category::Files => "files",
            Category::Packages => "packages",
            Category::Shell => "shell",
            Category::Network => "network",
            Category::Secrets => "secrets",
            Category::System => "system",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "files" => Some(Category::Files),
            "packages" => Some(Category::Packages),
            "shell" => Some(Category::Shell),
            "network" => Some(Category::Network),
            "secrets" => Some(Category::Secrets),
            "system" => Some(Category::System),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `category:action` permission token.
///
/// The string form (`"category:action"`) is cached at construction so sets
/// can hash and compare capabilities cheaply. Capabilities are cheap to copy
/// and compare; two capabilities are equal iff their category and action are
/// pairwise equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    category: Category,
    action: String,
    cached: String,
}

/// The fixed set of capabilities that always require explicit user approval,
/// even when granted by policy.
pub const DANGEROUS: &[(Category, &str)] = &[
    (Category::Shell, "execute"),
    (Category::Secrets, "read"),
    (Category::Secrets, "write"),
    (Category::System, "modify"),
];

impl Capability {
    /// Construct a capability from a category and action directly; this path
    /// never fails since the category is already a validated enum member.
    pub fn new(category: Category, action: impl Into<String>) -> Self {
        let action = action.into();
        let cached = format!("{}:{}", category, action);
        Self {
            category,
            action,
            cached,
        }
    }

    /// Parse a `"category:action"` token.
    ///
    /// Trims surrounding whitespace, splits on the first `:`, and validates
    /// the category against the closed enumeration. The action retains any
    /// embedded colons beyond the first (so `network:fetch:https` parses as
    /// category `network`, action `fetch:https`, though no well-known action
    /// uses embedded colons today).
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidCapability {
                detail: "empty capability string".into(),
            });
        }
        let Some((category_str, action_str)) = trimmed.split_once(':') else {
            return Err(CoreError::InvalidCapability {
                detail: format!("missing ':' in {trimmed:?}"),
            });
        };
        let category = Category::parse(category_str).ok_or_else(|| CoreError::InvalidCapability {
            detail: format!("unknown category {category_str:?}"),
        })?;
        if action_str.is_empty() {
            return Err(CoreError::InvalidCapability {
                detail: format!("empty action in {trimmed:?}"),
            });
        }
        Ok(Self::new(category, action_str))
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// A capability is zero iff its string form is empty; the only way to
    /// produce a zero capability is `Capability::default()` or `zero()`.
    pub fn zero() -> Self {
        Self {
            category: Category::Files,
            action: String::new(),
            cached: String::new(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cached.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.cached
    }

    /// Wildcard matching: a capability with action `*` matches any capability
    /// in the same category. Matching is symmetric — either side may bear the
    /// wildcard. Capabilities in different categories never match.
    pub fn matches(&self, other: &Capability) -> bool {
        if self.category != other.category {
            return false;
        }
        self.action == "*" || other.action == "*" || self.action == other.action
    }

    /// Dangerous membership is by exact (category, action) equality, never by
    /// wildcard: a granted `shell:*` is not itself "dangerous" by this check,
    /// though it would wildcard-match the dangerous `shell:execute` token
    /// when evaluated through a set's `matches`.
    pub fn is_dangerous(&self) -> bool {
        DANGEROUS
            .iter()
            .any(|(cat, action)| *cat == self.category && *action == self.action)
    }
}

impl Default for Capability {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cached)
    }
}
