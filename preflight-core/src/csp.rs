//! Content Security Policy: regex rules that flag suspicious shell content
//! regardless of whether the capability gate would allow it.

use regex::Regex;

use crate::error::CoreError;

/// How a matched rule should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The content must not run.
    Deny,
    /// The content may run, but the match should be surfaced to the user.
    Warn,
}

struct CompiledRule {
    name: &'static str,
    severity: Severity,
    pattern: &'static str,
    regex: Regex,
}

/// One match against a piece of content.
#[derive(Debug, Clone)]
pub struct CspMatch {
    pub rule_name: &'static str,
    pub severity: Severity,
    pub excerpt: String,
}

/// The aggregate outcome of validating one piece of content against a `Csp`.
#[derive(Debug, Clone, Default)]
pub struct CspResult {
    pub matches: Vec<CspMatch>,
}

impl CspResult {
    pub fn is_clean(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn has_deny(&self) -> bool {
        self.matches.iter().any(|m| m.severity == Severity::Deny)
    }

    pub fn denies(&self) -> impl Iterator<Item = &CspMatch> {
        self.matches.iter().filter(|m| m.severity == Severity::Deny)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CspMatch> {
        self.matches.iter().filter(|m| m.severity == Severity::Warn)
    }
}

/// An ordered list of compiled rules. Rules compile lazily, at `build()`
/// time, not at the point each pattern is added — so a bad pattern added
/// early doesn't abort rules added after it; all patterns are attempted and
/// the first failure is reported with its own pattern text.
#[derive(Default)]
pub struct CspBuilder {
    patterns: Vec<(&'static str, Severity, &'static str)>,
}

impl CspBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, name: &'static str, severity: Severity, pattern: &'static str) -> Self {
        self.patterns.push((name, severity, pattern));
        self
    }

    pub fn build(self) -> Result<Csp, CoreError> {
        let mut rules = Vec::with_capacity(self.patterns.len());
        for (name, severity, pattern) in self.patterns {
            let regex = Regex::new(pattern).map_err(|source| CoreError::InvalidCspPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            rules.push(CompiledRule { name, severity, pattern, regex });
        }
        Ok(Csp { rules })
    }
}

/// A compiled, ordered set of content security rules.
pub struct Csp {
    rules: Vec<CompiledRule>,
}

impl Csp {
    pub fn builder() -> CspBuilder {
        CspBuilder::new()
    }

    /// Runs every rule against `content`, in rule order, collecting every
    /// match (a piece of content may trip more than one rule).
    pub fn validate(&self, content: &str) -> CspResult {
        let mut matches = Vec::new();
        for rule in &self.rules {
            if let Some(found) = rule.regex.find(content) {
                matches.push(CspMatch {
                    rule_name: rule.name,
                    severity: rule.severity,
                    excerpt: found.as_str().to_string(),
                });
            }
        }
        CspResult { matches }
    }

    /// Validates each of `contents`, returning only the results that carry
    /// at least one match — clean content is dropped rather than reported
    /// as an empty placeholder.
    pub fn validate_all<'a>(&self, contents: impl IntoIterator<Item = &'a str>) -> Vec<CspResult> {
        contents
            .into_iter()
            .map(|c| self.validate(c))
            .filter(|r| !r.is_clean())
            .collect()
    }

    /// Rebuilds a `CspBuilder` seeded with this `Csp`'s own rules, in order,
    /// so a caller can layer more rules on top of an existing rule set (e.g.
    /// `default_csp()`) without re-typing its patterns.
    pub fn into_builder(self) -> CspBuilder {
        let mut builder = CspBuilder::new();
        for rule in self.rules {
            builder = builder.rule(rule.name, rule.severity, rule.pattern);
        }
        builder
    }
}

/// The baseline rule set: denies the shapes of shell content that are almost
/// never legitimate in a plugin, warns on shapes that are sometimes
/// legitimate but merit a second look.
pub fn default_csp() -> Csp {
    Csp::builder()
        .rule(
            "curl-pipe-shell",
            Severity::Deny,
            r"(?i)\b(curl|wget)\b[^\n]*\|\s*(sh|bash|zsh)\b",
        )
        .rule("chmod-777", Severity::Deny, r"\bchmod\s+777\b")
        .rule("leading-sudo", Severity::Deny, r"(?m)^\s*sudo\b")
        .rule(
            "rm-rf-system-dir",
            Severity::Deny,
            r"\brm\s+-rf\s+/(etc|usr|bin|sbin|var)\b",
        )
        .rule(
            "redirect-write-system-dir",
            Severity::Deny,
            r">\s*/(etc|usr)/",
        )
        .rule("eval-builtin", Severity::Warn, r"\beval\b")
        .rule(
            "command-substitution",
            Severity::Warn,
            r"\$\([^)]*\)",
        )
        .rule("source-dev-stdin", Severity::Warn, r"\bsource\s+/dev/stdin\b")
        .rule("base64-decode", Severity::Warn, r"\bbase64\b[^\n]*\s-d\b")
        .build()
        .expect("default CSP patterns are valid regexes")
}

/// A tighter rule set layered over the default: also denies brace expansion,
/// pipes, and command chaining, which `default_csp` only warns on or
/// tolerates entirely.
pub fn strict_csp() -> Csp {
    Csp::builder()
        .rule(
            "curl-pipe-shell",
            Severity::Deny,
            r"(?i)\b(curl|wget)\b[^\n]*\|\s*(sh|bash|zsh)\b",
        )
        .rule("chmod-777", Severity::Deny, r"\bchmod\s+777\b")
        .rule("leading-sudo", Severity::Deny, r"(?m)^\s*sudo\b")
        .rule(
            "rm-rf-system-dir",
            Severity::Deny,
            r"\brm\s+-rf\s+/(etc|usr|bin|sbin|var)\b",
        )
        .rule(
            "redirect-write-system-dir",
            Severity::Deny,
            r">\s*/(etc|usr)/",
        )
        .rule("eval-builtin", Severity::Deny, r"\beval\b")
        .rule("command-substitution", Severity::Deny, r"\$\([^)]*\)")
        .rule("brace-expansion", Severity::Deny, r"\$\{[^}]*\}")
        .rule("pipe-operator", Severity::Deny, r"\|")
        .rule("background-operator", Severity::Deny, r"&")
        .rule("command-chain", Severity::Deny, r";")
        .rule("source-dev-stdin", Severity::Deny, r"\bsource\s+/dev/stdin\b")
        .rule("base64-decode", Severity::Warn, r"\bbase64\b[^\n]*\s-d\b")
        .build()
        .expect("strict CSP patterns are valid regexes")
}
