//! TTL policy resolution
//!
//! Rules are checked in the order they were added and the first rule whose
//! pattern is a substring of the resource name wins. A name such as
//! `fixtures/statistics` therefore resolves to the `fixtures` lifetime.

use chrono::Duration;

/// How long a cache entry stays fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Entry expires after the given duration
    Expires(Duration),
    /// Entry never expires (`expires_at` is NULL)
    Forever,
}

/// A single `(substring, lifetime)` rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlRule {
    pub pattern: String,
    pub lifetime: Lifetime,
}

/// Ordered list of TTL rules with a mandatory default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    rules: Vec<TtlRule>,
    default: Lifetime,
}

impl Default for TtlPolicy {
    /// Reference policy for the football data provider
    fn default() -> Self {
        Self::new(Lifetime::Expires(Duration::minutes(15)))
            .rule("fixtures", Lifetime::Expires(Duration::minutes(30)))
            .rule("odds", Lifetime::Expires(Duration::minutes(5)))
            .rule("leagues", Lifetime::Expires(Duration::hours(24)))
            .rule("teams", Lifetime::Expires(Duration::hours(24)))
            .rule("predictions", Lifetime::Expires(Duration::minutes(60)))
            .rule("h2h", Lifetime::Expires(Duration::hours(12)))
            .rule("statistics", Lifetime::Expires(Duration::hours(24)))
    }
}

impl TtlPolicy {
    /// Creates a policy with no rules and the given fallback lifetime
    pub fn new(default: Lifetime) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    /// Appends a rule; it is checked after every rule added before it
    pub fn rule(mut self, pattern: impl Into<String>, lifetime: Lifetime) -> Self {
        self.rules.push(TtlRule {
            pattern: pattern.into(),
            lifetime,
        });
        self
    }

    /// Resolves the lifetime for a resource name
    pub fn resolve(&self, resource_name: &str) -> Lifetime {
        self.rules
            .iter()
            .find(|rule| resource_name.contains(rule.pattern.as_str()))
            .map(|rule| rule.lifetime)
            .unwrap_or(self.default)
    }

    pub fn rules(&self) -> &[TtlRule] {
        &self.rules
    }

    pub fn default_lifetime(&self) -> Lifetime {
        self.default
    }
}
