use std::collections::HashMap;

use super::entity::{Action, DomainPattern, Rule};
use super::error::FilterError;

/// Upper bound on merge streams per lookup: exact tier + catch-all tier
/// + one trie node per label (a valid pattern has at most 127 labels).
const MAX_STREAMS: usize = 130;

/// Immutable, tiered rule index.
///
/// Rules are split at build time into three tiers:
/// - an exact-match map (FQDN → rule indices),
/// - a reversed-label suffix trie for `*.suffix` wildcards,
/// - a catch-all list for `*`.
///
/// Each tier keeps its entries pre-sorted by (priority desc, insertion
/// asc); `check` merges the tiers lazily and stops at the first enabled
/// rule whose `query_types` filter admits the query. Lookups walk
/// O(labels) trie nodes and never allocate.
///
/// The engine is built once at startup and shared read-only; a rules
/// change means building a fresh engine and swapping the `Arc`.
#[derive(Debug)]
pub struct FilterEngine {
    rules: Vec<Rule>,
    exact: HashMap<String, Vec<u32>>,
    suffix_root: SuffixNode,
    catch_all: Vec<u32>,
}

#[derive(Debug, Default)]
struct SuffixNode {
    children: HashMap<String, SuffixNode>,
    rules: Vec<u32>,
}

/// Result of a rule lookup.
pub struct Verdict<'a> {
    pub action: Action,
    pub rule: Option<&'a Rule>,
}

impl FilterEngine {
    /// Build the index. Validates every rule and rejects duplicate IDs
    /// before any index state is constructed.
    pub fn new(rules: Vec<Rule>) -> Result<Self, FilterError> {
        for rule in &rules {
            rule.validate()?;
        }
        for (i, rule) in rules.iter().enumerate() {
            if rules[i + 1..].iter().any(|r| r.id == rule.id) {
                return Err(FilterError::DuplicateRule {
                    id: rule.id.to_string(),
                });
            }
        }

        let mut exact: HashMap<String, Vec<u32>> = HashMap::new();
        let mut suffix_root = SuffixNode::default();
        let mut catch_all: Vec<u32> = Vec::new();

        for (idx, rule) in rules.iter().enumerate() {
            let idx = idx as u32;
            for pattern in &rule.domains {
                match pattern {
                    DomainPattern::Exact(name) => {
                        exact.entry(name.clone()).or_default().push(idx);
                    }
                    DomainPattern::Suffix(suffix) => {
                        let mut node = &mut suffix_root;
                        for label in suffix.rsplit('.') {
                            node = node.children.entry(label.to_string()).or_default();
                        }
                        node.rules.push(idx);
                    }
                    DomainPattern::Any => catch_all.push(idx),
                }
            }
        }

        // Pre-sort every tier list: priority desc, insertion asc.
        let order = |a: &u32, b: &u32| {
            rules[*b as usize]
                .priority
                .cmp(&rules[*a as usize].priority)
                .then(a.cmp(b))
        };
        for list in exact.values_mut() {
            list.sort_by(order);
            list.dedup();
        }
        catch_all.sort_by(order);
        catch_all.dedup();
        sort_trie(&mut suffix_root, &order);

        Ok(Self {
            rules,
            exact,
            suffix_root,
            catch_all,
        })
    }

    /// Evaluate a query name and QTYPE against the rule set.
    ///
    /// `name` must be lowercase (the parser guarantees this); uppercase
    /// input is tolerated at the cost of one allocation.
    pub fn check(&self, name: &str, qtype: u16) -> Verdict<'_> {
        let lowered;
        let name = if name.bytes().any(|b| b.is_ascii_uppercase()) {
            lowered = name.to_ascii_lowercase();
            lowered.as_str()
        } else {
            name
        };

        let mut streams: [&[u32]; MAX_STREAMS] = [&[]; MAX_STREAMS];
        let mut n = 0;

        if let Some(list) = self.exact.get(name) {
            streams[n] = list;
            n += 1;
        }

        // Walk the suffix trie right-to-left. A node's rules are
        // candidates only when the name has labels left below the
        // matched suffix (`*.bad.com` does not match `bad.com`).
        let label_count = name.split('.').count();
        let mut node = &self.suffix_root;
        let mut depth = 0;
        for label in name.rsplit('.') {
            match node.children.get(label) {
                Some(child) => {
                    depth += 1;
                    if !child.rules.is_empty() && depth < label_count && n < MAX_STREAMS {
                        streams[n] = &child.rules;
                        n += 1;
                    }
                    node = child;
                }
                None => break,
            }
        }

        if !self.catch_all.is_empty() && n < MAX_STREAMS {
            streams[n] = &self.catch_all;
            n += 1;
        }

        // Lazy merge: repeatedly take the best head (priority desc,
        // insertion asc) across the candidate streams.
        let mut pos = [0usize; MAX_STREAMS];
        loop {
            let mut best: Option<(usize, u32)> = None;
            for s in 0..n {
                if pos[s] >= streams[s].len() {
                    continue;
                }
                let idx = streams[s][pos[s]];
                let better = match best {
                    None => true,
                    Some((_, best_idx)) => {
                        let p = self.rules[idx as usize].priority;
                        let bp = self.rules[best_idx as usize].priority;
                        p > bp || (p == bp && idx < best_idx)
                    }
                };
                if better {
                    best = Some((s, idx));
                }
            }
            let Some((s, idx)) = best else { break };
            pos[s] += 1;

            let rule = &self.rules[idx as usize];
            if !rule.enabled || !rule.admits_qtype(qtype) {
                continue;
            }
            return Verdict {
                action: rule.action,
                rule: Some(rule),
            };
        }

        Verdict {
            action: Action::Allow,
            rule: None,
        }
    }

    /// All loaded rules in insertion order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn sort_trie(node: &mut SuffixNode, order: &impl Fn(&u32, &u32) -> std::cmp::Ordering) {
    node.rules.sort_by(order);
    node.rules.dedup();
    for child in node.children.values_mut() {
        sort_trie(child, order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::entity::RuleId;

    // ── Test helpers ───────────────────────────────────────────────

    fn make_rule(id: &str, priority: i32, action: Action, domains: &[&str]) -> Rule {
        Rule {
            id: RuleId(id.to_string()),
            priority,
            enabled: true,
            action,
            domains: domains
                .iter()
                .map(|d| DomainPattern::parse(d).unwrap())
                .collect(),
            query_types: Vec::new(),
            description: String::new(),
        }
    }

    fn engine(rules: Vec<Rule>) -> FilterEngine {
        FilterEngine::new(rules).unwrap()
    }

    // ── Construction ───────────────────────────────────────────────

    #[test]
    fn empty_engine_allows_everything() {
        let eng = engine(vec![]);
        let v = eng.check("anything.example.com", 1);
        assert_eq!(v.action, Action::Allow);
        assert!(v.rule.is_none());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let rules = vec![
            make_rule("dup", 10, Action::Block, &["a.com"]),
            make_rule("dup", 20, Action::Allow, &["b.com"]),
        ];
        assert!(matches!(
            FilterEngine::new(rules).unwrap_err(),
            FilterError::DuplicateRule { .. }
        ));
    }

    #[test]
    fn invalid_rule_rejected() {
        let mut rule = make_rule("r1", 10, Action::Block, &["a.com"]);
        rule.domains.clear();
        assert!(FilterEngine::new(vec![rule]).is_err());
    }

    // ── Tier matching ──────────────────────────────────────────────

    #[test]
    fn exact_match_hits() {
        let eng = engine(vec![make_rule("r1", 10, Action::Block, &["evil.com"])]);
        assert_eq!(eng.check("evil.com", 1).action, Action::Block);
        assert_eq!(eng.check("sub.evil.com", 1).action, Action::Allow);
        assert_eq!(eng.check("notevil.com", 1).action, Action::Allow);
    }

    #[test]
    fn suffix_matches_strictly_below() {
        let eng = engine(vec![make_rule("r1", 10, Action::Block, &["*.bad.com"])]);
        assert_eq!(eng.check("malware.bad.com", 1).action, Action::Block);
        assert_eq!(eng.check("deep.malware.bad.com", 1).action, Action::Block);
        // The apex itself is not below the wildcard.
        assert_eq!(eng.check("bad.com", 1).action, Action::Allow);
        assert_eq!(eng.check("notbad.com", 1).action, Action::Allow);
        // Suffix must align on a label boundary.
        assert_eq!(eng.check("x.verybad.com", 1).action, Action::Allow);
    }

    #[test]
    fn catch_all_matches_everything() {
        let eng = engine(vec![make_rule("r1", 1, Action::Log, &["*"])]);
        assert_eq!(eng.check("a", 1).action, Action::Log);
        assert_eq!(eng.check("x.y.z", 255).action, Action::Log);
    }

    #[test]
    fn check_normalizes_case() {
        let eng = engine(vec![make_rule("r1", 10, Action::Block, &["evil.com"])]);
        assert_eq!(eng.check("EVIL.COM", 1).action, Action::Block);
    }

    // ── Priority and tie-breaking ──────────────────────────────────

    #[test]
    fn higher_priority_wins_across_tiers() {
        // The Log rule at priority 50 beats the priority-10 catch-all
        // Block even though both match.
        let mut log_rule = make_rule("log-txt", 50, Action::Log, &["*.dyndns.org"]);
        log_rule.query_types = vec![16]; // TXT
        let rules = vec![log_rule, make_rule("block-all", 10, Action::Block, &["*"])];
        let eng = engine(rules);

        let v = eng.check("host.dyndns.org", 16);
        assert_eq!(v.action, Action::Log);
        assert_eq!(v.rule.unwrap().id.0, "log-txt");
    }

    #[test]
    fn equal_priority_ties_break_by_insertion() {
        let rules = vec![
            make_rule("first", 10, Action::Log, &["a.com"]),
            make_rule("second", 10, Action::Block, &["a.com"]),
        ];
        let eng = engine(rules);
        assert_eq!(eng.check("a.com", 1).rule.unwrap().id.0, "first");
    }

    #[test]
    fn exact_does_not_outrank_higher_priority_wildcard() {
        // Tier kind carries no precedence of its own — only priority does.
        let rules = vec![
            make_rule("exact-low", 1, Action::Allow, &["a.bad.com"]),
            make_rule("wild-high", 100, Action::Block, &["*.bad.com"]),
        ];
        let eng = engine(rules);
        assert_eq!(eng.check("a.bad.com", 1).rule.unwrap().id.0, "wild-high");
    }

    #[test]
    fn nested_wildcards_all_candidates() {
        let rules = vec![
            make_rule("outer", 10, Action::Log, &["*.com"]),
            make_rule("inner", 20, Action::Block, &["*.bad.com"]),
        ];
        let eng = engine(rules);
        assert_eq!(eng.check("x.bad.com", 1).rule.unwrap().id.0, "inner");
        assert_eq!(eng.check("bad.com", 1).rule.unwrap().id.0, "outer");
    }

    // ── Filters ────────────────────────────────────────────────────

    #[test]
    fn disabled_rules_are_skipped() {
        let mut blocked = make_rule("off", 100, Action::Block, &["a.com"]);
        blocked.enabled = false;
        let rules = vec![blocked, make_rule("on", 1, Action::Log, &["a.com"])];
        let eng = engine(rules);
        let v = eng.check("a.com", 1);
        assert_eq!(v.action, Action::Log);
        assert_eq!(v.rule.unwrap().id.0, "on");
    }

    #[test]
    fn qtype_filter_skips_non_admitted() {
        let mut txt_only = make_rule("txt", 100, Action::Block, &["a.com"]);
        txt_only.query_types = vec![16];
        let rules = vec![txt_only, make_rule("any", 1, Action::Log, &["a.com"])];
        let eng = engine(rules);
        assert_eq!(eng.check("a.com", 16).action, Action::Block);
        assert_eq!(eng.check("a.com", 1).action, Action::Log);
    }

    #[test]
    fn no_match_returns_allow_without_rule() {
        let eng = engine(vec![make_rule("r1", 10, Action::Block, &["evil.com"])]);
        let v = eng.check("good.com", 1);
        assert_eq!(v.action, Action::Allow);
        assert!(v.rule.is_none());
    }

    // ── Determinism and scale ──────────────────────────────────────

    #[test]
    fn check_is_deterministic() {
        let rules = vec![
            make_rule("a", 10, Action::Block, &["*.x.com", "y.com"]),
            make_rule("b", 10, Action::Log, &["*.x.com"]),
            make_rule("c", 5, Action::Block, &["*"]),
        ];
        let eng = engine(rules);
        let first = eng.check("q.x.com", 1).rule.unwrap().id.0.clone();
        for _ in 0..100 {
            assert_eq!(eng.check("q.x.com", 1).rule.unwrap().id.0, first);
        }
    }

    #[test]
    fn thousand_rules_classify_target_exactly() {
        // One block rule buried in a large set of unrelated rules;
        // only the target domain may classify as Block.
        let mut rules: Vec<Rule> = (0..1000)
            .map(|i| {
                make_rule(
                    &format!("rule{i}"),
                    (i % 100) as i32,
                    Action::Log,
                    &[&format!("domain{i}.example.com")],
                )
            })
            .collect();
        rules[500].action = Action::Block;
        let eng = engine(rules);

        let v = eng.check("domain500.example.com", 1);
        assert_eq!(v.action, Action::Block);
        assert_eq!(v.rule.unwrap().id.0, "rule500");

        assert_eq!(eng.check("domain501.example.com", 1).action, Action::Log);
        assert_eq!(eng.check("unlisted.example.com", 1).action, Action::Allow);
    }

    #[test]
    fn rule_listing_preserves_insertion_order() {
        let rules = vec![
            make_rule("low", 1, Action::Allow, &["a.com"]),
            make_rule("high", 100, Action::Block, &["b.com"]),
        ];
        let eng = engine(rules);
        assert_eq!(eng.rules()[0].id.0, "low");
        assert_eq!(eng.rules()[1].id.0, "high");
        assert_eq!(eng.len(), 2);
    }
}
