use std::collections::HashSet;

use bb_core::types::RuleFlags;

use crate::parser::CompiledRule;

/// Dedup and `$badfilter` cross-cancellation counters, surfaced to the CLI
/// as compile-time diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    pub badfilter_rules: usize,
    pub badfiltered_rules: usize,
}

/// Deduplicate identical rules, then apply `$badfilter` cross-cancellation:
/// a `$badfilter` rule nullifies any other rule sharing the same pattern
/// and option set (pattern/anchor/type/party/scheme), regardless of which
/// list contributed either one. `$badfilter` rules never survive into the
/// compiled snapshot themselves — they're consumed here.
pub fn optimize_rules(rules: &mut Vec<CompiledRule>) -> OptimizeStats {
    let before = rules.len();

    let mut seen: HashSet<RuleKey> = HashSet::new();
    rules.retain(|rule| {
        let key = RuleKey::from(rule);
        if seen.contains(&key) {
            false
        } else {
            seen.insert(key);
            true
        }
    });
    let after_dedup = rules.len();
    let deduped = before - after_dedup;

    let badfilter_rules = rules
        .iter()
        .filter(|r| r.flags.contains(RuleFlags::BADFILTER))
        .count();

    let cancel_keys: HashSet<CancelKey> = rules
        .iter()
        .filter(|r| r.flags.contains(RuleFlags::BADFILTER))
        .map(CancelKey::from)
        .collect();

    let mut badfiltered_rules = 0usize;
    rules.retain(|rule| {
        if rule.flags.contains(RuleFlags::BADFILTER) {
            return false;
        }
        if cancel_keys.contains(&CancelKey::from(rule)) {
            badfiltered_rules += 1;
            false
        } else {
            true
        }
    });

    OptimizeStats {
        before,
        after: rules.len(),
        deduped,
        badfilter_rules,
        badfiltered_rules,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey {
    action: u8,
    flags: u32,
    type_mask: u32,
    party_mask: u8,
    scheme_mask: u8,
    list_id: u16,
    domain: String,
    pattern: Option<String>,
    anchor_type: u8,
    constraint_include: Vec<u64>,
    constraint_exclude: Vec<u64>,
}

impl From<&CompiledRule> for RuleKey {
    fn from(rule: &CompiledRule) -> Self {
        let (include, exclude) = match &rule.domain_constraints {
            Some(c) => (
                c.include.iter().map(|h| h.to_u64()).collect(),
                c.exclude.iter().map(|h| h.to_u64()).collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        Self {
            action: rule.action as u8,
            flags: rule.flags.bits(),
            type_mask: rule.type_mask.bits(),
            party_mask: rule.party_mask.bits(),
            scheme_mask: rule.scheme_mask.bits(),
            list_id: rule.list_id,
            domain: rule.domain.clone(),
            pattern: rule.pattern.clone(),
            anchor_type: rule.anchor_type as u8,
            constraint_include: include,
            constraint_exclude: exclude,
        }
    }
}

/// Narrower key than `RuleKey`: ignores `list_id`, `action`, and the
/// `badfilter` bit itself so a `$badfilter` on one list can cancel a rule
/// contributed by another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CancelKey {
    type_mask: u32,
    party_mask: u8,
    scheme_mask: u8,
    domain: String,
    pattern: Option<String>,
    anchor_type: u8,
}

impl From<&CompiledRule> for CancelKey {
    fn from(rule: &CompiledRule) -> Self {
        Self {
            type_mask: rule.type_mask.bits(),
            party_mask: rule.party_mask.bits(),
            scheme_mask: rule.scheme_mask.bits(),
            domain: rule.domain.clone(),
            pattern: rule.pattern.clone(),
            anchor_type: rule.anchor_type as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_filter_list;

    #[test]
    fn dedups_identical_rules() {
        let mut rules = parse_filter_list("||ads.example.com^\n||ads.example.com^\n");
        let stats = optimize_rules(&mut rules);
        assert_eq!(stats.before, 2);
        assert_eq!(stats.after, 1);
        assert_eq!(stats.deduped, 1);
    }

    #[test]
    fn badfilter_cancels_matching_rule() {
        let mut rules = parse_filter_list("||ads.example.com^\n||ads.example.com^$badfilter\n");
        let stats = optimize_rules(&mut rules);
        assert_eq!(stats.before, 2);
        assert_eq!(stats.badfilter_rules, 1);
        assert_eq!(stats.badfiltered_rules, 1);
        assert_eq!(stats.after, 0);
    }

    #[test]
    fn badfilter_does_not_touch_unrelated_rules() {
        let mut rules = parse_filter_list("||ads.example.com^\n||tracker.example.com^$badfilter\n");
        let stats = optimize_rules(&mut rules);
        assert_eq!(stats.badfiltered_rules, 0);
        assert_eq!(stats.after, 1);
    }
}
