//! A plain-text network rule parser for the declarative converter.
//!
//! Deliberately separate from `bb_compiler::parser`: that parser hashes
//! domain lists into the matcher's `DomainConstraint` (no way back to the
//! original strings), while declarative `initiatorDomains` /
//! `excludedInitiatorDomains` need the strings themselves. Shares the same
//! rule-syntax idioms (cosmetic-separator skip, last-unescaped-`$` split,
//! domain normalization) adapted to retain text instead of hashes.

use bb_core::types::{PartyMask, RequestType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRule {
    pub source_rule_index: usize,
    pub raw: String,
    pub pattern: String,
    pub is_regex: bool,
    pub is_allowlist: bool,
    pub important: bool,
    pub document: bool,
    pub match_case: bool,
    pub left_anchor: bool,
    pub right_anchor: bool,
    pub host_anchor: bool,
    pub enabled_types: RequestType,
    pub disabled_types: RequestType,
    pub party_mask: PartyMask,
    pub permitted_domains: Vec<String>,
    pub restricted_domains: Vec<String>,
    pub denyallow: Vec<String>,
    pub redirect: Option<String>,
    pub removeparam: Option<String>,
    pub removeheader: Option<String>,
    pub csp: Option<String>,
    pub cookie: Option<String>,
    pub badfilter: bool,
}

/// Parse a filter list's network rules, skipping cosmetic and comment lines.
/// `source_rule_index` is the rule's position among network rules only
/// (matches `bb_compiler::parser::parse_filter_list`'s emission order),
/// which is what `source_map`/`rules_hash_map` key against.
pub fn parse_network_rules(text: &str) -> Vec<NetworkRule> {
    let mut rules = Vec::new();

    for raw_line in text.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if find_cosmetic_separator(line).is_some() {
            continue;
        }
        if is_comment_line(line) {
            continue;
        }

        let mut is_allowlist = false;
        if let Some(rest) = line.strip_prefix("@@") {
            is_allowlist = true;
            line = rest.trim_start();
        }

        let (pattern_part, options_text) = split_rule_options(line);
        let opts = match options_text {
            Some(text) => match parse_options(text) {
                Some(opts) => opts,
                None => continue,
            },
            None => ParsedOptions::default(),
        };

        let pattern_str = pattern_part.trim();
        if pattern_str.is_empty() {
            continue;
        }

        let (left_anchor, host_anchor, body) = if let Some(rest) = pattern_str.strip_prefix("||") {
            (false, true, rest)
        } else if let Some(rest) = pattern_str.strip_prefix('|') {
            (true, false, rest)
        } else {
            (false, false, pattern_str)
        };

        let (right_anchor, body) = match body.strip_suffix('|') {
            Some(rest) => (true, rest),
            None => (false, body),
        };

        let (is_regex, pattern) = if body.len() >= 2 && body.starts_with('/') && body.ends_with('/') {
            (true, body[1..body.len() - 1].to_string())
        } else {
            (false, body.to_string())
        };

        let index = rules.len();
        rules.push(NetworkRule {
            source_rule_index: index,
            raw: raw_line.trim().to_string(),
            pattern,
            is_regex,
            is_allowlist,
            important: opts.important,
            document: opts.document,
            match_case: opts.match_case,
            left_anchor,
            right_anchor,
            host_anchor,
            enabled_types: opts.enabled_types,
            disabled_types: opts.disabled_types,
            party_mask: opts.party_mask,
            permitted_domains: opts.permitted_domains,
            restricted_domains: opts.restricted_domains,
            denyallow: opts.denyallow,
            redirect: opts.redirect,
            removeparam: opts.removeparam,
            removeheader: opts.removeheader,
            csp: opts.csp,
            cookie: opts.cookie,
            badfilter: opts.badfilter,
        });
    }

    rules
}

#[derive(Clone)]
struct ParsedOptions {
    important: bool,
    document: bool,
    match_case: bool,
    enabled_types: RequestType,
    disabled_types: RequestType,
    party_mask: PartyMask,
    permitted_domains: Vec<String>,
    restricted_domains: Vec<String>,
    denyallow: Vec<String>,
    redirect: Option<String>,
    removeparam: Option<String>,
    removeheader: Option<String>,
    csp: Option<String>,
    cookie: Option<String>,
    badfilter: bool,
}

impl Default for ParsedOptions {
    fn default() -> Self {
        Self {
            important: false,
            document: false,
            match_case: false,
            enabled_types: RequestType::empty(),
            disabled_types: RequestType::empty(),
            party_mask: PartyMask::ALL,
            permitted_domains: Vec::new(),
            restricted_domains: Vec::new(),
            denyallow: Vec::new(),
            redirect: None,
            removeparam: None,
            removeheader: None,
            csp: None,
            cookie: None,
            badfilter: false,
        }
    }
}

fn parse_options(text: &str) -> Option<ParsedOptions> {
    let mut opts = ParsedOptions::default();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(opts);
    }

    for raw in trimmed.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let raw_lower = raw.to_ascii_lowercase();

        match raw_lower.as_str() {
            "important" => {
                opts.important = true;
                continue;
            }
            "badfilter" => {
                opts.badfilter = true;
                continue;
            }
            "match-case" | "match_case" => {
                opts.match_case = true;
                continue;
            }
            "document" | "doc" => {
                opts.document = true;
                continue;
            }
            "third-party" | "thirdparty" | "3p" => {
                opts.party_mask = PartyMask::THIRD_PARTY;
                continue;
            }
            "first-party" | "firstparty" | "1p" | "~third-party" | "~thirdparty" => {
                opts.party_mask = PartyMask::FIRST_PARTY;
                continue;
            }
            _ => {}
        }

        if let Some(value) = raw_lower.strip_prefix("domain=") {
            let (permitted, restricted) = parse_domain_list(value)?;
            opts.permitted_domains.extend(permitted);
            opts.restricted_domains.extend(restricted);
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("denyallow=") {
            opts.denyallow = value
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(normalize_domain)
                .collect();
            continue;
        }

        if let Some(value) = raw_lower
            .strip_prefix("redirect=")
            .or_else(|| raw_lower.strip_prefix("redirect-rule="))
        {
            if !value.is_empty() {
                opts.redirect = Some(value.to_string());
            }
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("removeparam=") {
            opts.removeparam = Some(value.to_string());
            continue;
        }
        if raw_lower == "removeparam" {
            opts.removeparam = Some(String::new());
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("removeheader=") {
            opts.removeheader = Some(value.to_string());
            continue;
        }

        if let Some(value) = raw.strip_prefix("csp=").or_else(|| raw.strip_prefix("CSP=")) {
            opts.csp = Some(value.to_string());
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("cookie=") {
            opts.cookie = Some(value.to_string());
            continue;
        }
        if raw_lower == "cookie" {
            opts.cookie = Some(String::new());
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower.as_str()),
        };

        if name.is_empty() || name.contains('=') {
            return None;
        }

        if let Some(mask) = request_type_mask(name) {
            if negated {
                opts.disabled_types |= mask;
            } else {
                opts.enabled_types |= mask;
            }
            continue;
        }

        return None;
    }

    Some(opts)
}

fn parse_domain_list(value: &str) -> Option<(Vec<String>, Vec<String>)> {
    let mut permitted = Vec::new();
    let mut restricted = Vec::new();

    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (is_restricted, domain_raw) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let domain = normalize_domain(domain_raw)?;
        if is_restricted {
            restricted.push(domain);
        } else {
            permitted.push(domain);
        }
    }

    if permitted.is_empty() && restricted.is_empty() {
        return None;
    }
    Some((permitted, restricted))
}

fn request_type_mask(name: &str) -> Option<RequestType> {
    match name {
        "script" => Some(RequestType::SCRIPT),
        "image" => Some(RequestType::IMAGE),
        "stylesheet" => Some(RequestType::STYLESHEET),
        "object" => Some(RequestType::OBJECT),
        "subdocument" => Some(RequestType::SUBDOCUMENT),
        "main_frame" => Some(RequestType::MAIN_FRAME),
        "xmlhttprequest" | "xhr" => Some(RequestType::XMLHTTPREQUEST),
        "media" => Some(RequestType::MEDIA),
        "font" => Some(RequestType::FONT),
        "ping" => Some(RequestType::PING),
        "websocket" => Some(RequestType::WEBSOCKET),
        "beacon" => Some(RequestType::BEACON),
        "fetch" => Some(RequestType::FETCH),
        "other" => Some(RequestType::OTHER),
        _ => None,
    }
}

/// Mirrors `bb_compiler::parser::split_rule_options`: finds the last
/// unescaped `$` so patterns like `/ads\$money/` keep their trailing `$`.
fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    let bytes = line.as_bytes();
    let mut last = None;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == b'$' {
            last = Some(i);
        }
        i += 1;
    }
    match last {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

fn find_cosmetic_separator(line: &str) -> Option<(usize, &'static str)> {
    const SEPARATORS: [&str; 7] = ["#@?#", "#@$#", "#@#", "#?#", "#$#", "##", "#%#"];
    let mut best: Option<(usize, &'static str)> = None;
    for sep in SEPARATORS {
        if let Some(pos) = line.find(sep) {
            if best.map_or(true, |(best_pos, _)| pos < best_pos) {
                best = Some((pos, sep));
            }
        }
    }
    best
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[') || line.starts_with('#')
}

pub(crate) fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.is_ascii() {
        if !trimmed.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-') {
            return None;
        }
        return Some(trimmed.to_ascii_lowercase());
    }
    idna::domain_to_ascii(&trimmed.to_lowercase()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_block_rule() {
        let rules = parse_network_rules("||ads.example.com^$script,third-party\n");
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].is_allowlist);
        assert!(rules[0].host_anchor);
        assert_eq!(rules[0].enabled_types, RequestType::SCRIPT);
        assert_eq!(rules[0].party_mask, PartyMask::THIRD_PARTY);
    }

    #[test]
    fn parses_allowlist_with_domain_list() {
        let rules = parse_network_rules("@@||cdn.example.com^$domain=example.com|~sub.example.com\n");
        assert_eq!(rules.len(), 1);
        assert!(rules[0].is_allowlist);
        assert_eq!(rules[0].permitted_domains, vec!["example.com".to_string()]);
        assert_eq!(rules[0].restricted_domains, vec!["sub.example.com".to_string()]);
    }

    #[test]
    fn skips_cosmetic_and_comment_lines() {
        let rules = parse_network_rules("! comment\nexample.com##.ad\n||ads.example.com^\n");
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn parses_removeparam_grouping_inputs() {
        let rules = parse_network_rules(
            "||tracker.com/*$removeparam=uid\n||tracker.com/*$removeparam=ref\n",
        );
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].removeparam.as_deref(), Some("uid"));
        assert_eq!(rules[1].removeparam.as_deref(), Some("ref"));
    }

    #[test]
    fn parses_badfilter_flag() {
        let rules = parse_network_rules("||ads.example.com^$badfilter\n");
        assert!(rules[0].badfilter);
    }
}
