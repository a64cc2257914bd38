//! Lowers parsed `NetworkRule`s into a declarative condition/action rule
//! set (the shape a browser-native declarative rule engine consumes).

use std::collections::HashMap;

use bb_core::types::{PartyMask, RequestType};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::hashmap::{negates_badfilter, RulesHashMap};
use crate::rule::NetworkRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Block,
    Allow,
    AllowAllRequests,
    Redirect,
    ModifyHeaders,
    UpgradeScheme,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct QueryTransform {
    pub remove_params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct RedirectTransform {
    pub extension_path: Option<String>,
    pub query: Option<String>,
    pub query_transform: Option<QueryTransform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum HeaderOperation {
    Append,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct HeaderModification {
    pub header: String,
    pub operation: HeaderOperation,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct DeclarativeAction {
    #[serde(rename = "type")]
    pub action_type: Option<ActionType>,
    pub redirect: Option<RedirectTransform>,
    pub response_headers: Vec<HeaderModification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum DomainType {
    FirstParty,
    ThirdParty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct DeclarativeCondition {
    pub url_filter: Option<String>,
    pub regex_filter: Option<String>,
    pub is_url_filter_case_sensitive: bool,
    pub resource_types: Vec<String>,
    pub excluded_resource_types: Vec<String>,
    pub initiator_domains: Vec<String>,
    pub excluded_initiator_domains: Vec<String>,
    pub excluded_request_domains: Vec<String>,
    pub domain_type: Option<DomainType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct DeclarativeRule {
    pub id: u32,
    pub priority: u32,
    pub action: DeclarativeAction,
    pub condition: DeclarativeCondition,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConversionError {
    #[error("rule {source_rule_index} produces a regex too complex to emit ({reason})")]
    TooComplexRegex { source_rule_index: usize, reason: String },
    #[error("rule {source_rule_index} uses a construct the declarative output can't express ({reason})")]
    Unsupported { source_rule_index: usize, reason: String },
    #[error("rule {source_rule_index} is a $cookie rule, which has no declarative equivalent")]
    UnsupportedCookieRule { source_rule_index: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct LimitationError {
    pub number_of_maximum_rules: usize,
    pub number_of_excluded_declarative_rules: usize,
    pub excluded_rules_ids: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub filter_id: u16,
    pub max_rules: usize,
    pub max_regex_rules: usize,
    pub id_offset: u32,
    /// Maps a `$redirect=` resource name to its declarative extension path.
    pub redirect_resources: HashMap<String, String>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            filter_id: 0,
            max_rules: 30_000,
            max_regex_rules: 1_000,
            id_offset: 1,
            redirect_resources: HashMap::new(),
        }
    }
}

pub struct ConversionResult {
    pub rules: Vec<DeclarativeRule>,
    pub errors: Vec<ConversionError>,
    pub limitations: Option<LimitationError>,
    pub source_map: HashMap<u32, Vec<(u16, usize)>>,
    pub rules_hash_map: RulesHashMap,
    pub bad_filter_rules: Vec<String>,
}

struct Candidate {
    rule: DeclarativeRule,
    sources: Vec<(u16, usize)>,
    group_key: Option<String>,
}

pub fn convert_static_ruleset(rules: &[NetworkRule], options: &ConversionOptions) -> ConversionResult {
    let mut errors = Vec::new();
    let mut bad_filter_rules = Vec::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    for rule in rules {
        if rule.badfilter {
            bad_filter_rules.push(rule.raw.clone());
            continue;
        }

        if rule.cookie.is_some() {
            errors.push(ConversionError::UnsupportedCookieRule {
                source_rule_index: rule.source_rule_index,
            });
            continue;
        }

        match lower_rule(rule, options) {
            Ok(candidate) => candidates.push(candidate),
            Err(err) => errors.push(err),
        }
    }

    merge_removeparam_groups(&mut candidates);

    let regex_count = candidates
        .iter()
        .filter(|c| c.rule.condition.regex_filter.is_some())
        .count();

    let mut excluded_ids = Vec::new();
    if regex_count > options.max_regex_rules {
        let mut seen_regex = 0usize;
        candidates.retain(|c| {
            if c.rule.condition.regex_filter.is_some() {
                seen_regex += 1;
                if seen_regex > options.max_regex_rules {
                    excluded_ids.push(c.rule.id);
                    return false;
                }
            }
            true
        });
    }

    if candidates.len() > options.max_rules {
        for dropped in candidates.split_off(options.max_rules) {
            excluded_ids.push(dropped.rule.id);
        }
    }

    let limitations = if excluded_ids.is_empty() {
        None
    } else {
        Some(LimitationError {
            number_of_maximum_rules: options.max_rules,
            number_of_excluded_declarative_rules: excluded_ids.len(),
            excluded_rules_ids: excluded_ids,
        })
    };

    let mut source_map = HashMap::new();
    let mut final_rules = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        source_map.insert(candidate.rule.id, candidate.sources);
        final_rules.push(candidate.rule);
    }

    let rules_hash_map = RulesHashMap::build(options.filter_id, rules);

    ConversionResult {
        rules: final_rules,
        errors,
        limitations,
        source_map,
        rules_hash_map,
        bad_filter_rules,
    }
}

/// Static rule set context needed to resolve a dynamic `$badfilter` against
/// rules already converted from a different filter. Declarative engines
/// have no notion of cross-ruleset cancellation, so this returns the
/// surviving static declarative rule ids that must be disabled out-of-band.
pub struct StaticRuleSet<'a> {
    pub filter_id: u16,
    pub rules: &'a [NetworkRule],
    pub source_map: &'a HashMap<u32, Vec<(u16, usize)>>,
}

pub fn convert_dynamic_rulesets(dynamic_rules: &[NetworkRule], static_sets: &[StaticRuleSet]) -> Vec<u32> {
    let mut to_cancel = Vec::new();

    for bad in dynamic_rules.iter().filter(|r| r.badfilter) {
        for set in static_sets {
            let hash_map = RulesHashMap::build(set.filter_id, set.rules);
            for &(filter_id, source_idx) in hash_map.lookup(&bad.pattern) {
                let Some(candidate) = set.rules.get(source_idx) else { continue };
                if !negates_badfilter(bad, candidate) {
                    continue;
                }
                for (decl_id, sources) in set.source_map {
                    if sources.iter().any(|&(fid, idx)| fid == filter_id && idx == source_idx) {
                        to_cancel.push(*decl_id);
                    }
                }
            }
        }
    }

    to_cancel.sort_unstable();
    to_cancel.dedup();
    to_cancel
}

fn lower_rule(rule: &NetworkRule, options: &ConversionOptions) -> Result<Candidate, ConversionError> {
    if rule.is_regex {
        check_regex_support(rule)?;
    }

    let priority = if rule.document && rule.is_allowlist {
        4
    } else if rule.important && rule.is_allowlist {
        3
    } else if rule.important {
        2
    } else if rule.is_allowlist {
        1
    } else {
        1
    };

    let mut condition = DeclarativeCondition {
        is_url_filter_case_sensitive: rule.match_case,
        resource_types: types_to_strings(rule.enabled_types),
        excluded_resource_types: types_to_strings(rule.disabled_types),
        initiator_domains: rule.permitted_domains.clone(),
        excluded_initiator_domains: rule.restricted_domains.clone(),
        excluded_request_domains: rule.denyallow.clone(),
        domain_type: if rule.party_mask == PartyMask::FIRST_PARTY {
            Some(DomainType::FirstParty)
        } else if rule.party_mask == PartyMask::THIRD_PARTY {
            Some(DomainType::ThirdParty)
        } else {
            None
        },
        ..Default::default()
    };

    if rule.is_regex {
        condition.regex_filter = Some(rule.pattern.clone());
    } else {
        condition.url_filter = Some(build_url_filter(rule));
    }

    let group_key = rule
        .removeparam
        .is_some()
        .then(|| removeparam_group_key(&condition));

    let action = if rule.document && rule.is_allowlist {
        DeclarativeAction {
            action_type: Some(ActionType::AllowAllRequests),
            ..Default::default()
        }
    } else if rule.is_allowlist {
        DeclarativeAction {
            action_type: Some(ActionType::Allow),
            ..Default::default()
        }
    } else if let Some(name) = &rule.redirect {
        DeclarativeAction {
            action_type: Some(ActionType::Redirect),
            redirect: Some(RedirectTransform {
                extension_path: Some(
                    options
                        .redirect_resources
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| name.clone()),
                ),
                query: None,
                query_transform: None,
            }),
            ..Default::default()
        }
    } else if let Some(params) = &rule.removeparam {
        let remove_params: Vec<String> = params
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let transform = if remove_params.is_empty() {
            RedirectTransform {
                extension_path: None,
                query: Some(String::new()),
                query_transform: None,
            }
        } else {
            RedirectTransform {
                extension_path: None,
                query: None,
                query_transform: Some(QueryTransform { remove_params }),
            }
        };
        DeclarativeAction {
            action_type: Some(ActionType::Redirect),
            redirect: Some(transform),
            ..Default::default()
        }
    } else if let Some(csp) = &rule.csp {
        DeclarativeAction {
            action_type: Some(ActionType::ModifyHeaders),
            response_headers: vec![HeaderModification {
                header: "content-security-policy".to_string(),
                operation: HeaderOperation::Append,
                value: Some(csp.clone()),
            }],
            ..Default::default()
        }
    } else if let Some(header) = &rule.removeheader {
        DeclarativeAction {
            action_type: Some(ActionType::ModifyHeaders),
            response_headers: vec![HeaderModification {
                header: header.clone(),
                operation: HeaderOperation::Remove,
                value: None,
            }],
            ..Default::default()
        }
    } else {
        DeclarativeAction {
            action_type: Some(ActionType::Block),
            ..Default::default()
        }
    };

    Ok(Candidate {
        rule: DeclarativeRule {
            id: options.id_offset + rule.source_rule_index as u32,
            priority,
            action,
            condition,
        },
        sources: vec![(options.filter_id, rule.source_rule_index)],
        group_key,
    })
}

/// Groups `$removeparam` candidates that share a condition (ignoring the
/// removeparam value itself) into one declarative rule whose
/// `removeParams` is the union, per the grouping rule in the rule's own
/// design: one network request can only be rewritten once, so N
/// single-param filter-list rules become one declarative rule.
fn merge_removeparam_groups(candidates: &mut Vec<Candidate>) {
    let mut groups: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());

    for candidate in candidates.drain(..) {
        let Some(key) = candidate.group_key.clone() else {
            merged.push(candidate);
            continue;
        };

        if let Some(&idx) = groups.get(&key) {
            let existing: &mut Candidate = &mut merged[idx];
            existing.sources.extend(candidate.sources);
            if let Some(action) = &mut existing.rule.action.redirect {
                if let Some(new_action) = candidate.rule.action.redirect {
                    merge_redirect_transform(action, new_action);
                }
            }
        } else {
            groups.insert(key, merged.len());
            merged.push(candidate);
        }
    }

    *candidates = merged;
}

fn merge_redirect_transform(existing: &mut RedirectTransform, incoming: RedirectTransform) {
    if existing.query.is_some() || incoming.query.is_some() {
        existing.query = Some(String::new());
        existing.query_transform = None;
        return;
    }
    let mut params = existing
        .query_transform
        .take()
        .map(|t| t.remove_params)
        .unwrap_or_default();
    if let Some(t) = incoming.query_transform {
        params.extend(t.remove_params);
    }
    params.sort();
    params.dedup();
    existing.query_transform = Some(QueryTransform { remove_params: params });
}

fn removeparam_group_key(condition: &DeclarativeCondition) -> String {
    format!(
        "{:?}|{:?}|{:?}|{:?}|{:?}",
        condition.url_filter,
        condition.regex_filter,
        condition.resource_types,
        condition.initiator_domains,
        condition.domain_type
    )
}

fn build_url_filter(rule: &NetworkRule) -> String {
    let mut out = String::new();
    if rule.host_anchor {
        out.push_str("||");
    } else if rule.left_anchor {
        out.push('|');
    }
    out.push_str(&rule.pattern);
    if rule.right_anchor {
        out.push('|');
    }
    out
}

fn types_to_strings(mask: RequestType) -> Vec<String> {
    const ALL: &[(RequestType, &str)] = &[
        (RequestType::MAIN_FRAME, "main_frame"),
        (RequestType::SUBDOCUMENT, "sub_frame"),
        (RequestType::SCRIPT, "script"),
        (RequestType::IMAGE, "image"),
        (RequestType::STYLESHEET, "stylesheet"),
        (RequestType::OBJECT, "object"),
        (RequestType::XMLHTTPREQUEST, "xmlhttprequest"),
        (RequestType::FONT, "font"),
        (RequestType::MEDIA, "media"),
        (RequestType::PING, "ping"),
        (RequestType::WEBSOCKET, "websocket"),
        (RequestType::BEACON, "other"),
        (RequestType::FETCH, "other"),
        (RequestType::OTHER, "other"),
    ];
    let mut out: Vec<String> = ALL
        .iter()
        .filter(|(bit, _)| mask.contains(*bit))
        .map(|(_, name)| name.to_string())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Rejects regex features the declarative engine's RE2-level matcher can't
/// express (backreferences, negative lookaround, possessive quantifiers)
/// and patterns whose alternation groups are too complex to compile into a
/// bounded-size declarative regex.
fn check_regex_support(rule: &NetworkRule) -> Result<(), ConversionError> {
    let pattern = &rule.pattern;

    if pattern.contains("(?!") || pattern.contains("(?<!") {
        return Err(ConversionError::Unsupported {
            source_rule_index: rule.source_rule_index,
            reason: "negative lookaround is unsupported".to_string(),
        });
    }
    for digit in '1'..='9' {
        if pattern.contains(&format!("\\{digit}")) {
            return Err(ConversionError::Unsupported {
                source_rule_index: rule.source_rule_index,
                reason: "backreferences are unsupported".to_string(),
            });
        }
    }
    if pattern.contains("*+") || pattern.contains("++") || pattern.contains("?+") {
        return Err(ConversionError::Unsupported {
            source_rule_index: rule.source_rule_index,
            reason: "possessive quantifiers are unsupported".to_string(),
        });
    }

    let (group_count, max_group_len) = count_alternation_groups(pattern);
    if group_count > 15 {
        return Err(ConversionError::TooComplexRegex {
            source_rule_index: rule.source_rule_index,
            reason: format!("{group_count} alternation groups exceeds the limit of 15"),
        });
    }
    if max_group_len > 31 {
        return Err(ConversionError::TooComplexRegex {
            source_rule_index: rule.source_rule_index,
            reason: format!("a group of {max_group_len} chars exceeds the limit of 31"),
        });
    }

    Ok(())
}

/// Scans top-level parenthesized groups, returning how many contain a `|`
/// alternation and the longest such group's length.
fn count_alternation_groups(pattern: &str) -> (usize, usize) {
    let bytes = pattern.as_bytes();
    let mut depth = 0i32;
    let mut group_start = 0usize;
    let mut has_alt = false;
    let mut alt_groups = 0usize;
    let mut max_len = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => {
                if depth == 0 {
                    group_start = i;
                    has_alt = false;
                }
                depth += 1;
            }
            b'|' if depth > 0 => has_alt = true,
            b')' => {
                depth -= 1;
                if depth == 0 && has_alt {
                    alt_groups += 1;
                    max_len = max_len.max(i - group_start + 1);
                }
            }
            _ => {}
        }
    }

    (alt_groups, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::parse_network_rules;

    fn opts() -> ConversionOptions {
        ConversionOptions::default()
    }

    #[test]
    fn blocks_lower_to_block_action() {
        let rules = parse_network_rules("||ads.example.com^$script\n");
        let result = convert_static_ruleset(&rules, &opts());
        assert_eq!(result.rules.len(), 1);
        assert_eq!(result.rules[0].action.action_type, Some(ActionType::Block));
        assert_eq!(result.rules[0].priority, 1);
    }

    #[test]
    fn document_allowlist_gets_allow_all_requests_and_top_priority() {
        let rules = parse_network_rules("@@||example.com^$document\n");
        let result = convert_static_ruleset(&rules, &opts());
        assert_eq!(result.rules[0].action.action_type, Some(ActionType::AllowAllRequests));
        assert_eq!(result.rules[0].priority, 4);
    }

    #[test]
    fn removeparam_rules_merge_into_one_declarative_rule() {
        let rules = parse_network_rules(
            "||tracker.com/*$removeparam=uid\n||tracker.com/*$removeparam=ref\n",
        );
        let result = convert_static_ruleset(&rules, &opts());
        assert_eq!(result.rules.len(), 1);
        let redirect = result.rules[0].action.redirect.as_ref().unwrap();
        let params = &redirect.query_transform.as_ref().unwrap().remove_params;
        assert!(params.contains(&"uid".to_string()));
        assert!(params.contains(&"ref".to_string()));
        assert_eq!(result.source_map[&result.rules[0].id].len(), 2);
    }

    #[test]
    fn too_complex_regex_is_dropped_with_error() {
        let rules = parse_network_rules(
            "/foo\\.(bar|baz|qux|quux|a1|a2|a3|a4|a5|a6|a7|a8|a9|a10|a11|a12|a13|a14|a15|a16)/\n",
        );
        let result = convert_static_ruleset(&rules, &opts());
        assert!(result.rules.is_empty());
        assert!(matches!(result.errors[0], ConversionError::TooComplexRegex { .. }));
    }

    #[test]
    fn cookie_rules_are_dropped_with_typed_error() {
        let rules = parse_network_rules("||example.com^$cookie\n");
        let result = convert_static_ruleset(&rules, &opts());
        assert!(result.rules.is_empty());
        assert!(matches!(result.errors[0], ConversionError::UnsupportedCookieRule { .. }));
    }

    #[test]
    fn badfilter_rules_are_excluded_and_collected() {
        let rules = parse_network_rules("||ads.example.com^$badfilter\n");
        let result = convert_static_ruleset(&rules, &opts());
        assert!(result.rules.is_empty());
        assert_eq!(result.bad_filter_rules.len(), 1);
    }

    #[test]
    fn max_rules_limit_excludes_overflow_in_order() {
        let mut text = String::new();
        for i in 0..5 {
            text.push_str(&format!("||site{i}.example.com^\n"));
        }
        let rules = parse_network_rules(&text);
        let mut options = opts();
        options.max_rules = 3;
        let result = convert_static_ruleset(&rules, &options);
        assert_eq!(result.rules.len(), 3);
        let limitation = result.limitations.unwrap();
        assert_eq!(limitation.number_of_excluded_declarative_rules, 2);
    }
}
