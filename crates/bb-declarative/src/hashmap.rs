//! Indexes network rules by pattern hash so a dynamic `$badfilter` can be
//! matched against an already-converted static rule set without
//! re-scanning its source text.

use std::collections::HashMap;

use bb_core::hash::hash_pattern;

use crate::rule::NetworkRule;

#[derive(Debug, Clone, Default)]
pub struct RulesHashMap {
    entries: HashMap<u64, Vec<(u16, usize)>>,
}

impl RulesHashMap {
    pub fn build(filter_id: u16, rules: &[NetworkRule]) -> Self {
        let mut entries: HashMap<u64, Vec<(u16, usize)>> = HashMap::new();
        for rule in rules {
            let key = pattern_hash(rule);
            entries.entry(key).or_default().push((filter_id, rule.source_rule_index));
        }
        Self { entries }
    }

    pub fn lookup(&self, pattern: &str) -> &[(u16, usize)] {
        self.entries
            .get(&hash_pattern(pattern))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn merge(&mut self, other: &RulesHashMap) {
        for (key, hits) in &other.entries {
            self.entries.entry(*key).or_default().extend(hits.iter().copied());
        }
    }

    pub fn into_entries(self) -> Vec<(u64, Vec<(u16, usize)>)> {
        self.entries.into_iter().collect()
    }
}

fn pattern_hash(rule: &NetworkRule) -> u64 {
    hash_pattern(&rule.pattern)
}

/// A `$badfilter` rule `bad` negates a static rule `candidate` when the
/// pattern hash collision is a true match: same pattern text, same
/// allowlist/type/party shape, and `bad`'s modifier set is a superset of
/// (or equal to) `candidate`'s — mirroring uBO's own badfilter semantics.
pub fn negates_badfilter(bad: &NetworkRule, candidate: &NetworkRule) -> bool {
    if bad.pattern != candidate.pattern {
        return false;
    }
    if bad.is_allowlist != candidate.is_allowlist {
        return false;
    }
    if bad.host_anchor != candidate.host_anchor
        || bad.left_anchor != candidate.left_anchor
        || bad.right_anchor != candidate.right_anchor
    {
        return false;
    }
    if !candidate.enabled_types.is_empty() && bad.enabled_types != candidate.enabled_types {
        return false;
    }
    if bad.party_mask != candidate.party_mask {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::parse_network_rules;

    #[test]
    fn lookup_finds_matching_pattern() {
        let rules = parse_network_rules("||ads.example.com^\n||tracker.example.com^\n");
        let map = RulesHashMap::build(0, &rules);
        let hits = map.lookup("ads.example.com^");
        assert_eq!(hits, &[(0, 0)]);
    }

    #[test]
    fn negates_badfilter_requires_matching_shape() {
        let rules = parse_network_rules("||ads.example.com^$script\n||ads.example.com^$script,badfilter\n");
        assert!(negates_badfilter(&rules[1], &rules[0]));
    }

    #[test]
    fn negates_badfilter_rejects_different_pattern() {
        let rules = parse_network_rules("||ads.example.com^\n||tracker.example.com^$badfilter\n");
        assert!(!negates_badfilter(&rules[1], &rules[0]));
    }
}
