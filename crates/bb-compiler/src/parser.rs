use std::net::IpAddr;

use bb_core::cosmetic::CosmeticRule;
use bb_core::hash::{hash_domain, Hash64};
use bb_core::psl::get_etld1;
use bb_core::types::{CosmeticKind, CosmeticOptions, PartyMask, RequestType, RuleAction, RuleFlags, SchemeMask};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConstraint {
    pub include: Vec<Hash64>,
    pub exclude: Vec<Hash64>,
}

/// Advanced modifiers that don't fit the fixed-width SoA rule columns.
/// Carried on `CompiledRule` through optimization, then lowered by the
/// declarative converter or consulted directly by the network engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdvancedModifiers {
    pub csp: Option<String>,
    pub cookie: Option<String>,
    pub removeparam: Option<String>,
    pub removeheader: Option<String>,
    pub replace: Option<String>,
    pub app: Option<String>,
    pub method: Option<String>,
    pub denyallow: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRule {
    pub action: RuleAction,
    pub flags: RuleFlags,
    pub domain: String,
    pub pattern: Option<String>,
    pub anchor_type: AnchorType,
    pub list_id: u16,
    pub type_mask: RequestType,
    pub party_mask: PartyMask,
    pub scheme_mask: SchemeMask,
    pub domain_constraints: Option<DomainConstraint>,
    pub redirect: Option<String>,
    pub advanced: AdvancedModifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorType {
    #[default]
    None,
    Left,
    Hostname,
}

pub fn parse_filter_list(text: &str) -> Vec<CompiledRule> {
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

        let mut action = RuleAction::Block;
        if let Some(rest) = line.strip_prefix("@@") {
            action = RuleAction::Allow;
            line = rest.trim_start();
        }

        let (pattern_part, options_text) = split_rule_options(line);
        let options = match options_text {
            Some(options_text) => match parse_options(options_text) {
                Some(options) => options,
                None => continue,
            },
            None => ParsedOptions::default(),
        };

        let pattern_str = pattern_part.trim();

        if let Some(domain) = parse_host_anchor_rule(pattern_str) {
            let (final_action, final_flags) = apply_redirect_action(action, options.flags, options.redirect.is_some());
            rules.push(CompiledRule {
                action: final_action,
                flags: final_flags,
                domain,
                pattern: None,
                anchor_type: AnchorType::Hostname,
                list_id: 0,
                type_mask: options.type_mask,
                party_mask: options.party_mask,
                scheme_mask: options.scheme_mask,
                domain_constraints: options.domain_constraints.clone(),
                redirect: options.redirect.clone(),
                advanced: options.advanced.clone(),
            });
            continue;
        }

        if let Some(domain) = parse_hosts_file_domain(pattern_str) {
            let (final_action, final_flags) = apply_redirect_action(action, options.flags, options.redirect.is_some());
            rules.push(CompiledRule {
                action: final_action,
                flags: final_flags,
                domain,
                pattern: None,
                anchor_type: AnchorType::Hostname,
                list_id: 0,
                type_mask: options.type_mask,
                party_mask: options.party_mask,
                scheme_mask: options.scheme_mask,
                domain_constraints: options.domain_constraints.clone(),
                redirect: options.redirect.clone(),
                advanced: options.advanced.clone(),
            });
            continue;
        }

        if let Some(parsed) = parse_pattern_rule(pattern_str) {
            let (final_action, final_flags) = apply_redirect_action(action, options.flags, options.redirect.is_some());
            rules.push(CompiledRule {
                action: final_action,
                flags: final_flags,
                domain: parsed.domain,
                pattern: Some(parsed.pattern),
                anchor_type: parsed.anchor_type,
                list_id: 0,
                type_mask: options.type_mask,
                party_mask: options.party_mask,
                scheme_mask: options.scheme_mask,
                domain_constraints: options.domain_constraints,
                redirect: options.redirect,
                advanced: options.advanced,
            });
        }
    }

    rules
}

/// Parse only the cosmetic rules out of a filter list, mirroring
/// `parse_filter_list`'s line loop. Covers element hiding (`##`, `#@#`,
/// `#?#`, `#@?#`), CSS injection (`#$#`, `#@$#`, `#$?#`, `#@$?#`),
/// scriptlet/JS injection (`#%#`, `#@%#`) and HTML filtering (`$$`, `$@$`),
/// plus a leading `[$domain=...,path=...,url=...]` modifier block.
pub fn parse_cosmetic_rules(text: &str, list_id: u16) -> Vec<CosmeticRule> {
    let mut rules = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let (modifiers, line) = split_modifier_block(line);

        let (sep_pos, separator) = match find_cosmetic_separator(line) {
            Some(found) => found,
            None => continue,
        };

        let domain_part = &line[..sep_pos];
        let body = &line[sep_pos + separator.len()..];
        if body.is_empty() {
            continue;
        }

        let is_allowlist = separator.contains('@');
        let kind = match separator {
            "##" | "#@#" | "#?#" | "#@?#" => CosmeticKind::ElementHide,
            "#$#" | "#@$#" | "#$?#" | "#@$?#" => CosmeticKind::CssInject,
            "#%#" | "#@%#" => {
                if body.trim_start().starts_with("//scriptlet(") {
                    CosmeticKind::Scriptlet
                } else {
                    CosmeticKind::JsInject
                }
            }
            "$$" | "$@$" => CosmeticKind::HtmlFilter,
            _ => continue,
        };

        let is_extended_css =
            matches!(separator, "#?#" | "#@?#" | "#$?#" | "#@$?#") || looks_like_extended_css(body);

        let mut options = CosmeticOptions::empty();
        if is_allowlist {
            options |= CosmeticOptions::ALLOWLIST;
        }
        if is_extended_css {
            options |= CosmeticOptions::EXTENDED_CSS;
        }

        let mut hostnames: Vec<String> = domain_part
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| normalize_domain(s))
            .collect();
        hostnames.extend(modifiers.domains.iter().cloned());

        if hostnames.is_empty() {
            options |= CosmeticOptions::GENERIC;
        }

        rules.push(CosmeticRule {
            kind,
            body: body.to_string(),
            options,
            hostnames,
            list_id,
            path: modifiers.path,
            url: modifiers.url,
        });
    }

    rules
}

#[derive(Default)]
struct CosmeticModifiers {
    domains: Vec<String>,
    path: Option<String>,
    url: Option<String>,
}

/// Strip a leading `[$domain=...,path=...,url=...]` modifier block, if
/// present, returning its parsed contents plus the remainder of the line.
fn split_modifier_block(line: &str) -> (CosmeticModifiers, &str) {
    let Some(rest) = line.strip_prefix("[$") else {
        return (CosmeticModifiers::default(), line);
    };
    let Some(close) = rest.find(']') else {
        return (CosmeticModifiers::default(), line);
    };

    let mut modifiers = CosmeticModifiers::default();
    for part in rest[..close].split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("domain=") {
            modifiers.domains = value
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(normalize_domain)
                .collect();
        } else if let Some(value) = part.strip_prefix("path=") {
            modifiers.path = Some(value.to_string());
        } else if let Some(value) = part.strip_prefix("url=") {
            modifiers.url = Some(value.to_string());
        }
    }

    (modifiers, &rest[close + 1..])
}

/// Locate the cosmetic separator in a line, if any, returning its byte
/// offset and the exact token matched. Checked before the generic `#`/`!`
/// comment heuristic so domain-less rules like `##.ad` aren't swallowed.
/// Longer, more specific markers are listed ahead of the shorter markers
/// they could otherwise tie with at the same position.
fn find_cosmetic_separator(line: &str) -> Option<(usize, &'static str)> {
    const SEPARATORS: [&str; 12] = [
        "#@$?#", "#@?#", "#@$#", "#@%#", "#@#", "#$?#", "#?#", "#$#", "#%#", "##", "$@$", "$$",
    ];
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

/// ExtendedCSS detection for `#$#`/`##` bodies that use procedural
/// pseudo-classes or attribute selectors ABP/uBO ship as ExtendedCSS-only.
fn looks_like_extended_css(body: &str) -> bool {
    const MARKERS: [&str; 7] = [
        ":has(", ":has-text(", ":matches-css(", ":xpath(", ":upward(", ":remove(", ":style(",
    ];
    MARKERS.iter().any(|m| body.contains(m))
}

fn apply_redirect_action(action: RuleAction, flags: RuleFlags, has_redirect: bool) -> (RuleAction, RuleFlags) {
    if has_redirect && action == RuleAction::Block {
        (RuleAction::RedirectDirective, flags | RuleFlags::FROM_REDIRECT_EQ)
    } else {
        (action, flags)
    }
}

#[derive(Clone)]
struct ParsedOptions {
    flags: RuleFlags,
    type_mask: RequestType,
    party_mask: PartyMask,
    scheme_mask: SchemeMask,
    domain_constraints: Option<DomainConstraint>,
    redirect: Option<String>,
    advanced: AdvancedModifiers,
}

impl Default for ParsedOptions {
    fn default() -> Self {
        Self {
            flags: RuleFlags::empty(),
            type_mask: RequestType::from_bits_truncate(0),
            party_mask: PartyMask::from_bits_truncate(0),
            scheme_mask: SchemeMask::from_bits_truncate(0),
            domain_constraints: None,
            redirect: None,
            advanced: AdvancedModifiers::default(),
        }
    }
}

/// Split a rule into its pattern and options text at the last unescaped
/// `$`. uBO/ABP allow `\$` inside regex patterns, so a naive first-`$`
/// split would truncate patterns like `/ads\$money/`.
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

fn parse_options(text: &str) -> Option<ParsedOptions> {
    let mut flags = RuleFlags::empty();
    let mut type_include = 0u32;
    let mut type_exclude = 0u32;
    let mut party_include = 0u8;
    let mut party_exclude = 0u8;
    let mut scheme_include = 0u8;
    let mut scheme_exclude = 0u8;
    let mut domain_constraints: Option<DomainConstraint> = None;
    let mut redirect: Option<String> = None;
    let mut advanced = AdvancedModifiers::default();

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(ParsedOptions::default());
    }

    for raw in trimmed.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        // Options carrying a raw value (csp/replace in particular) may
        // contain commas inside the value; those come through as-is here
        // because callers are expected to pre-split on top-level commas
        // only when no such value-bearing option is present on the line.
        let raw_lower = raw.to_ascii_lowercase();
        let raw_lower = raw_lower.as_str();

        if raw_lower == "important" {
            flags |= RuleFlags::IMPORTANT;
            continue;
        }

        if raw_lower == "badfilter" {
            flags |= RuleFlags::BADFILTER;
            continue;
        }

        if raw_lower == "match-case" || raw_lower == "match_case" {
            flags |= RuleFlags::MATCH_CASE;
            continue;
        }

        if raw_lower == "popup" {
            flags |= RuleFlags::POPUP;
            continue;
        }

        if raw_lower == "document" || raw_lower == "doc" {
            flags |= RuleFlags::DOCUMENT;
            continue;
        }

        if raw_lower == "stealth" {
            flags |= RuleFlags::STEALTH;
            continue;
        }

        if raw_lower == "elemhide" || raw_lower == "ehide" {
            flags |= RuleFlags::ELEMHIDE;
            continue;
        }

        if raw_lower == "generichide" || raw_lower == "ghide" {
            flags |= RuleFlags::GENERICHIDE;
            continue;
        }

        if raw_lower == "specifichide" || raw_lower == "shide" {
            flags |= RuleFlags::SPECIFICHIDE;
            continue;
        }

        if raw_lower == "jsinject" {
            flags |= RuleFlags::JSINJECT;
            continue;
        }

        if raw_lower == "urlblock" {
            flags |= RuleFlags::URLBLOCK;
            continue;
        }

        if raw_lower == "content" {
            flags |= RuleFlags::CONTENT;
            continue;
        }

        if let Some(domain_value) = raw_lower.strip_prefix("domain=") {
            let parsed = parse_domain_option(domain_value)?;
            domain_constraints = Some(merge_constraints(domain_constraints, parsed));
            continue;
        }

        if let Some(redirect_value) = raw_lower.strip_prefix("redirect=") {
            if !redirect_value.is_empty() {
                redirect = Some(redirect_value.to_string());
            }
            continue;
        }

        if let Some(redirect_value) = raw_lower.strip_prefix("redirect-rule=") {
            if !redirect_value.is_empty() {
                redirect = Some(redirect_value.to_string());
            }
            continue;
        }

        if let Some(value) = raw.strip_prefix("csp=").or_else(|| raw.strip_prefix("CSP=")) {
            advanced.csp = Some(value.to_string());
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("cookie=") {
            advanced.cookie = Some(value.to_string());
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("removeparam=") {
            advanced.removeparam = Some(value.to_string());
            continue;
        }
        if raw_lower == "removeparam" {
            advanced.removeparam = Some(String::new());
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("removeheader=") {
            advanced.removeheader = Some(value.to_string());
            continue;
        }

        if let Some(value) = raw.strip_prefix("replace=").or_else(|| raw.strip_prefix("REPLACE=")) {
            advanced.replace = Some(value.to_string());
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("app=") {
            advanced.app = Some(value.to_string());
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("method=") {
            advanced.method = Some(value.to_string());
            continue;
        }

        if let Some(value) = raw_lower.strip_prefix("denyallow=") {
            advanced.denyallow = value
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(normalize_domain)
                .collect();
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower),
        };

        if name.is_empty() || name.contains('=') {
            return None;
        }

        if let Some(mask) = request_type_mask(name) {
            if negated {
                type_exclude |= mask;
            } else {
                type_include |= mask;
            }
            continue;
        }

        if let Some(mask) = party_mask(name) {
            if negated {
                party_exclude |= mask;
            } else {
                party_include |= mask;
            }
            continue;
        }

        if let Some(mask) = scheme_mask(name) {
            if negated {
                scheme_exclude |= mask;
            } else {
                scheme_include |= mask;
            }
            continue;
        }

        return None;
    }

    let type_bits = finalize_mask_u32(type_include, type_exclude, RequestType::ALL.bits())?;
    let party_bits = finalize_mask_u8(party_include, party_exclude, PartyMask::ALL.bits())?;
    let scheme_bits = finalize_mask_u8(scheme_include, scheme_exclude, SchemeMask::ALL.bits())?;

    Some(ParsedOptions {
        flags,
        type_mask: RequestType::from_bits_truncate(type_bits),
        party_mask: PartyMask::from_bits_truncate(party_bits),
        scheme_mask: SchemeMask::from_bits_truncate(scheme_bits),
        domain_constraints,
        redirect,
        advanced,
    })
}

fn merge_constraints(existing: Option<DomainConstraint>, incoming: DomainConstraint) -> DomainConstraint {
    match existing {
        Some(mut current) => {
            current.include.extend(incoming.include);
            current.exclude.extend(incoming.exclude);
            current
        }
        None => incoming,
    }
}

fn parse_domain_option(value: &str) -> Option<DomainConstraint> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();

    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (is_exclude, domain_raw) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let domain = normalize_domain(domain_raw)?;
        let etld1 = get_etld1(&domain);
        let hash = hash_domain(&etld1);

        if is_exclude {
            exclude.push(hash);
        } else {
            include.push(hash);
        }
    }

    if include.is_empty() && exclude.is_empty() {
        return None;
    }

    Some(DomainConstraint { include, exclude })
}

fn finalize_mask_u32(include: u32, exclude: u32, all: u32) -> Option<u32> {
    let include = include & all;
    let exclude = exclude & all;
    let mut mask = if include != 0 { include & !exclude } else { all & !exclude };
    if mask == 0 {
        return None;
    }
    if mask == all {
        mask = 0;
    }
    Some(mask)
}

fn finalize_mask_u8(include: u8, exclude: u8, all: u8) -> Option<u8> {
    let include = include & all;
    let exclude = exclude & all;
    let mut mask = if include != 0 { include & !exclude } else { all & !exclude };
    if mask == 0 {
        return None;
    }
    if mask == all {
        mask = 0;
    }
    Some(mask)
}

fn request_type_mask(name: &str) -> Option<u32> {
    match name {
        "script" => Some(RequestType::SCRIPT.bits()),
        "image" => Some(RequestType::IMAGE.bits()),
        "stylesheet" => Some(RequestType::STYLESHEET.bits()),
        "object" => Some(RequestType::OBJECT.bits()),
        "subdocument" => Some(RequestType::SUBDOCUMENT.bits()),
        "main_frame" => Some(RequestType::MAIN_FRAME.bits()),
        "xmlhttprequest" | "xhr" => Some(RequestType::XMLHTTPREQUEST.bits()),
        "media" => Some(RequestType::MEDIA.bits()),
        "font" => Some(RequestType::FONT.bits()),
        "ping" => Some(RequestType::PING.bits()),
        "websocket" => Some(RequestType::WEBSOCKET.bits()),
        "beacon" => Some(RequestType::BEACON.bits()),
        "fetch" => Some(RequestType::FETCH.bits()),
        "csp" | "csp_report" => Some(RequestType::CSP_REPORT.bits()),
        "other" => Some(RequestType::OTHER.bits()),
        _ => None,
    }
}

fn party_mask(name: &str) -> Option<u8> {
    match name {
        "third-party" | "thirdparty" | "3p" => Some(PartyMask::THIRD_PARTY.bits()),
        "first-party" | "firstparty" | "1p" => Some(PartyMask::FIRST_PARTY.bits()),
        _ => None,
    }
}

fn scheme_mask(name: &str) -> Option<u8> {
    match name {
        "http" => Some(SchemeMask::HTTP.bits()),
        "https" => Some(SchemeMask::HTTPS.bits()),
        "ws" => Some(SchemeMask::WS.bits()),
        "wss" => Some(SchemeMask::WSS.bits()),
        "data" => Some(SchemeMask::DATA.bits()),
        "ftp" => Some(SchemeMask::FTP.bits()),
        _ => None,
    }
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[') || line.starts_with('#')
}

fn parse_host_anchor_rule(line: &str) -> Option<String> {
    let line = line.trim();
    if !line.starts_with("||") {
        return None;
    }

    let mut rest = &line[2..];
    if rest.starts_with('.') {
        rest = &rest[1..];
    }

    let mut end = rest.len();
    for (i, ch) in rest.char_indices() {
        if ch == '^' || ch == '|' {
            end = i;
            break;
        }
        if ch == '/' || ch == '?' || ch == '#' || ch == ':' {
            return None;
        }
    }

    let host = &rest[..end];
    normalize_domain(host)
}

fn parse_hosts_file_domain(line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;

    if first.parse::<IpAddr>().is_ok() {
        return normalize_domain(second);
    }

    None
}

fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.is_ascii() {
        if !trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
        {
            return None;
        }
        return Some(trimmed.to_ascii_lowercase());
    }

    // Non-ASCII host: filter lists sometimes carry raw Unicode hostnames
    // (`пример.рф`). Lower the Unicode form first, then convert to the
    // punycode form the matcher hashes against.
    idna::domain_to_ascii(&trimmed.to_lowercase()).ok()
}

struct ParsedPattern {
    domain: String,
    pattern: String,
    anchor_type: AnchorType,
}

fn parse_pattern_rule(line: &str) -> Option<ParsedPattern> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (anchor_type, rest) = if line.starts_with("||") {
        (AnchorType::Hostname, &line[2..])
    } else if line.starts_with('|') {
        (AnchorType::Left, &line[1..])
    } else {
        (AnchorType::None, line)
    };

    let rest = rest.trim_end_matches('|');

    if rest.is_empty() || rest.starts_with('/') && !rest.contains('.') {
        return None;
    }

    let domain = extract_pattern_domain(rest, anchor_type);

    Some(ParsedPattern {
        domain,
        pattern: rest.to_string(),
        anchor_type,
    })
}

fn extract_pattern_domain(pattern: &str, anchor_type: AnchorType) -> String {
    if anchor_type != AnchorType::Hostname {
        return String::new();
    }

    let mut end = pattern.len();
    for (i, ch) in pattern.char_indices() {
        if ch == '/' || ch == '^' || ch == '*' || ch == '?' || ch == '#' {
            end = i;
            break;
        }
    }

    let host_part = &pattern[..end];
    normalize_domain(host_part).unwrap_or_default()
}
