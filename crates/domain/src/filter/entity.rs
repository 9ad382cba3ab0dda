use serde::{Deserialize, Serialize};

use crate::common::entity::RuleId;

use super::error::FilterError;

// ── Actions ─────────────────────────────────────────────────────────

/// Classification applied to a matched query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Normal traffic — count only.
    Allow,
    /// Threat traffic — count, log, optionally answer with a block response.
    Block,
    /// Suspicious traffic — count and log the full tuple.
    Log,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
            Self::Log => "log",
        }
    }
}

// ── Domain patterns ─────────────────────────────────────────────────

/// A single domain pattern from a rule, pre-classified at build time.
///
/// Patterns are stored lowercase; matching input is expected lowercase
/// (the parser normalizes query names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainPattern {
    /// Exact FQDN match, e.g. `malware.example.com`.
    Exact(String),
    /// `*.suffix` — matches names strictly below `suffix`
    /// (`a.bad.com` matches `*.bad.com`; `bad.com` itself does not).
    Suffix(String),
    /// `*` — matches every name.
    Any,
}

impl DomainPattern {
    /// Parse and normalize a pattern string.
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let s = raw.trim().to_ascii_lowercase();
        if s.is_empty() {
            return Err(FilterError::InvalidPattern {
                pattern: raw.to_string(),
                reason: "empty pattern".to_string(),
            });
        }
        if s == "*" {
            return Ok(Self::Any);
        }
        if let Some(suffix) = s.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return Err(FilterError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: "wildcard must be '*' or '*.<suffix>'".to_string(),
                });
            }
            return Ok(Self::Suffix(suffix.to_string()));
        }
        if s.contains('*') {
            return Err(FilterError::InvalidPattern {
                pattern: raw.to_string(),
                reason: "'*' is only valid as a leading '*.' wildcard".to_string(),
            });
        }
        Ok(Self::Exact(s))
    }
}

// ── Rules ───────────────────────────────────────────────────────────

/// A single classification rule.
///
/// Evaluation order is priority-descending, ties broken by insertion
/// order; the first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub priority: i32,
    pub enabled: bool,
    pub action: Action,
    pub domains: Vec<DomainPattern>,
    /// Wire-format QTYPE codes this rule applies to. Empty = any type.
    pub query_types: Vec<u16>,
    pub description: String,
}

impl Rule {
    pub fn validate(&self) -> Result<(), FilterError> {
        self.id
            .validate()
            .map_err(|reason| FilterError::InvalidRuleId { reason })?;
        if self.domains.is_empty() {
            return Err(FilterError::EmptyDomains {
                id: self.id.to_string(),
            });
        }
        Ok(())
    }

    /// `true` when the rule's type filter admits the given QTYPE.
    pub fn admits_qtype(&self, qtype: u16) -> bool {
        self.query_types.is_empty() || self.query_types.contains(&qtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_exact() {
        assert_eq!(
            DomainPattern::parse("Malware.Example.COM").unwrap(),
            DomainPattern::Exact("malware.example.com".to_string())
        );
    }

    #[test]
    fn pattern_suffix() {
        assert_eq!(
            DomainPattern::parse("*.bad.com").unwrap(),
            DomainPattern::Suffix("bad.com".to_string())
        );
    }

    #[test]
    fn pattern_catch_all() {
        assert_eq!(DomainPattern::parse("*").unwrap(), DomainPattern::Any);
    }

    #[test]
    fn pattern_rejects_inner_wildcards() {
        for bad in ["", "a.*.com", "*.", "foo*bar.com", "*.a*b"] {
            assert!(DomainPattern::parse(bad).is_err(), "{bad:?}");
        }
    }

    fn make_rule(types: Vec<u16>) -> Rule {
        Rule {
            id: RuleId("r1".to_string()),
            priority: 10,
            enabled: true,
            action: Action::Block,
            domains: vec![DomainPattern::Any],
            query_types: types,
            description: String::new(),
        }
    }

    #[test]
    fn empty_type_filter_admits_all() {
        let rule = make_rule(vec![]);
        assert!(rule.admits_qtype(1));
        assert!(rule.admits_qtype(28));
        assert!(rule.admits_qtype(65_000));
    }

    #[test]
    fn type_filter_is_exact() {
        let rule = make_rule(vec![16, 28]);
        assert!(rule.admits_qtype(16));
        assert!(rule.admits_qtype(28));
        assert!(!rule.admits_qtype(1));
    }

    #[test]
    fn validate_requires_domains() {
        let mut rule = make_rule(vec![]);
        rule.domains.clear();
        assert!(matches!(
            rule.validate().unwrap_err(),
            FilterError::EmptyDomains { .. }
        ));
    }
}
