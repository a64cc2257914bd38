//! Cosmetic filter engine: element hiding, CSS/JS injection, scriptlets, and
//! HTML filtering.
//!
//! Network rules are keyed by URL/token; cosmetic rules are keyed by page
//! hostname instead, so they get their own hash-bucketed lookup rather than
//! riding the token-dictionary path. Rules with no hostname list are
//! "generic" and apply everywhere unless `$generichide` suppresses them;
//! rules scoped to a hostname are "specific" and looked up by walking the
//! page's suffixes the same way `matcher::match_domain_sets` does.

use std::collections::{HashMap, HashSet};

use crate::hash::hash_domain;
use crate::psl::walk_host_suffixes;
use crate::types::{CosmeticKind, CosmeticOptions};

/// A cosmetic rule as produced by the compiler, before bucketing.
#[derive(Debug, Clone)]
pub struct CosmeticRule {
    pub kind: CosmeticKind,
    pub body: String,
    pub options: CosmeticOptions,
    /// Hostnames/entities the rule is scoped to. Empty means generic.
    pub hostnames: Vec<String>,
    pub list_id: u16,
    /// `[$path=...]` modifier: only apply on pages whose path matches.
    pub path: Option<String>,
    /// `[$url=...]` modifier: only apply on pages whose full URL matches.
    pub url: Option<String>,
}

/// A resolved entry ready to apply to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmeticEntry {
    pub kind: CosmeticKind,
    pub body: String,
    pub extended_css: bool,
    pub list_id: u16,
    pub path: Option<String>,
    pub url: Option<String>,
}

impl CosmeticEntry {
    /// Name and positional args of a `//scriptlet(name, "arg1", "arg2")`
    /// body, for `CosmeticKind::Scriptlet` entries. Arguments may be bare or
    /// quoted with `'`/`"`; quotes are stripped.
    pub fn scriptlet_call(&self) -> Option<(String, Vec<String>)> {
        parse_scriptlet_call(&self.body)
    }

    fn applies_to(&self, path: &str, page_url: &str) -> bool {
        if let Some(want) = &self.path {
            if !path.starts_with(want.as_str()) {
                return false;
            }
        }
        if let Some(want) = &self.url {
            if !page_url.contains(want.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Parse a `//scriptlet(...)` call body into its name and argument list.
pub fn parse_scriptlet_call(body: &str) -> Option<(String, Vec<String>)> {
    let body = body.trim();
    let inner = body.strip_prefix("//scriptlet(")?.strip_suffix(')')?;

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in inner.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                ',' => {
                    parts.push(current.trim().to_string());
                    current = String::new();
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }

    let mut parts = parts.into_iter().filter(|p| !p.is_empty());
    let name = parts.next()?;
    Some((name, parts.collect()))
}

/// Cosmetic entries resolved for one page, split the way a content script
/// applies them: generic rules can be cheaply precompiled per site, specific
/// ones must be looked up per page, and ExtendedCSS selectors need a
/// different injection path than plain CSS.
#[derive(Debug, Default)]
pub struct CosmeticLookup<'a> {
    pub generic: Vec<&'a CosmeticEntry>,
    pub generic_ext_css: Vec<&'a CosmeticEntry>,
    pub specific: Vec<&'a CosmeticEntry>,
    pub specific_ext_css: Vec<&'a CosmeticEntry>,
}

/// Hostname-keyed cosmetic rule store.
pub struct CosmeticEngine {
    generic: Vec<CosmeticEntry>,
    specific: HashMap<u64, Vec<CosmeticEntry>>,
}

impl CosmeticEngine {
    pub fn empty() -> Self {
        Self {
            generic: Vec::new(),
            specific: HashMap::new(),
        }
    }

    /// Build the engine from a flat rule list, applying `#@#`-style
    /// allowlist cancellation: an allowlist rule cancels any block-kind
    /// entry with an identical body string within the same `(kind,
    /// hostname scope)`.
    pub fn build(rules: &[CosmeticRule]) -> Self {
        let mut canceled: HashSet<(u64, CosmeticKind, String)> = HashSet::new();
        for rule in rules {
            if !rule.options.contains(CosmeticOptions::ALLOWLIST) {
                continue;
            }
            for scope in scope_hashes(rule) {
                canceled.insert((scope, rule.kind, rule.body.clone()));
            }
        }

        let mut generic = Vec::new();
        let mut specific: HashMap<u64, Vec<CosmeticEntry>> = HashMap::new();

        for rule in rules {
            if rule.options.contains(CosmeticOptions::ALLOWLIST) {
                continue;
            }

            let entry = CosmeticEntry {
                kind: rule.kind,
                body: rule.body.clone(),
                extended_css: rule.options.contains(CosmeticOptions::EXTENDED_CSS),
                list_id: rule.list_id,
                path: rule.path.clone(),
                url: rule.url.clone(),
            };

            if rule.hostnames.is_empty() {
                if canceled.contains(&(0, rule.kind, rule.body.clone())) {
                    continue;
                }
                generic.push(entry);
            } else {
                for hostname in &rule.hostnames {
                    let h = hash_domain(hostname).to_u64();
                    if canceled.contains(&(h, rule.kind, rule.body.clone())) {
                        continue;
                    }
                    specific.entry(h).or_default().push(entry.clone());
                }
            }
        }

        Self { generic, specific }
    }

    /// Entries that apply to `page_url` (hostname `host`), honoring
    /// `$generichide`/`$specifichide` and each entry's own `$path`/`$url`
    /// modifier, split into generic/specific and plain/ExtendedCSS buckets.
    pub fn lookup(&self, host: &str, page_url: &str, generichide: bool, specifichide: bool) -> CosmeticLookup<'_> {
        let path = crate::url::extract_path(page_url);
        let mut out = CosmeticLookup::default();

        if !specifichide {
            for suffix in walk_host_suffixes(host) {
                let h = hash_domain(&suffix).to_u64();
                if let Some(entries) = self.specific.get(&h) {
                    for entry in entries {
                        if !entry.applies_to(path, page_url) {
                            continue;
                        }
                        if entry.extended_css {
                            out.specific_ext_css.push(entry);
                        } else {
                            out.specific.push(entry);
                        }
                    }
                }
            }
        }

        if !generichide {
            for entry in &self.generic {
                if !entry.applies_to(path, page_url) {
                    continue;
                }
                if entry.extended_css {
                    out.generic_ext_css.push(entry);
                } else {
                    out.generic.push(entry);
                }
            }
        }

        out
    }

    pub fn generic_count(&self) -> usize {
        self.generic.len()
    }

    pub fn specific_host_count(&self) -> usize {
        self.specific.len()
    }
}

fn scope_hashes(rule: &CosmeticRule) -> Vec<u64> {
    if rule.hostnames.is_empty() {
        vec![0]
    } else {
        rule.hostnames.iter().map(|h| hash_domain(h).to_u64()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(kind: CosmeticKind, body: &str, hosts: &[&str], opts: CosmeticOptions) -> CosmeticRule {
        CosmeticRule {
            kind,
            body: body.to_string(),
            options: opts,
            hostnames: hosts.iter().map(|s| s.to_string()).collect(),
            list_id: 0,
            path: None,
            url: None,
        }
    }

    #[test]
    fn generic_rule_applies_everywhere() {
        let rules = vec![rule(CosmeticKind::ElementHide, ".ad", &[], CosmeticOptions::empty())];
        let engine = CosmeticEngine::build(&rules);
        let entries = engine.lookup("example.com", "https://example.com/", false, false);
        assert_eq!(entries.generic.len(), 1);
        assert_eq!(entries.generic[0].body, ".ad");
    }

    #[test]
    fn specific_rule_only_applies_to_its_hostname() {
        let rules = vec![rule(CosmeticKind::ElementHide, ".ad", &["example.com"], CosmeticOptions::empty())];
        let engine = CosmeticEngine::build(&rules);
        assert_eq!(engine.lookup("example.com", "https://example.com/", false, false).specific.len(), 1);
        assert_eq!(engine.lookup("other.com", "https://other.com/", false, false).specific.len(), 0);
    }

    #[test]
    fn allowlist_cancels_matching_specific_rule() {
        let rules = vec![
            rule(CosmeticKind::ElementHide, ".ad", &["example.com"], CosmeticOptions::empty()),
            rule(CosmeticKind::ElementHide, ".ad", &["example.com"], CosmeticOptions::ALLOWLIST),
        ];
        let engine = CosmeticEngine::build(&rules);
        assert_eq!(engine.lookup("example.com", "https://example.com/", false, false).specific.len(), 0);
    }

    #[test]
    fn generichide_suppresses_generic_rules_only() {
        let rules = vec![
            rule(CosmeticKind::ElementHide, ".generic", &[], CosmeticOptions::empty()),
            rule(CosmeticKind::ElementHide, ".specific", &["example.com"], CosmeticOptions::empty()),
        ];
        let engine = CosmeticEngine::build(&rules);
        let entries = engine.lookup("example.com", "https://example.com/", true, false);
        assert_eq!(entries.generic.len(), 0);
        assert_eq!(entries.specific.len(), 1);
        assert_eq!(entries.specific[0].body, ".specific");
    }

    #[test]
    fn extended_css_entries_land_in_their_own_bucket() {
        let mut r = rule(CosmeticKind::ElementHide, ".x:has(> img)", &[], CosmeticOptions::empty());
        r.options |= CosmeticOptions::EXTENDED_CSS;
        let engine = CosmeticEngine::build(&[r]);
        let entries = engine.lookup("example.com", "https://example.com/", false, false);
        assert_eq!(entries.generic.len(), 0);
        assert_eq!(entries.generic_ext_css.len(), 1);
    }

    #[test]
    fn path_modifier_restricts_to_matching_pages() {
        let mut r = rule(CosmeticKind::ElementHide, ".ad", &[], CosmeticOptions::empty());
        r.path = Some("/account".to_string());
        let engine = CosmeticEngine::build(&[r]);
        assert_eq!(engine.lookup("example.com", "https://example.com/account/billing", false, false).generic.len(), 1);
        assert_eq!(engine.lookup("example.com", "https://example.com/home", false, false).generic.len(), 0);
    }

    #[test]
    fn scriptlet_call_parses_quoted_args() {
        let parsed = parse_scriptlet_call(r#"//scriptlet("set-constant", "x", "true")"#);
        assert_eq!(parsed, Some(("set-constant".to_string(), vec!["x".to_string(), "true".to_string()])));
    }

    #[test]
    fn scriptlet_call_parses_bare_args() {
        let parsed = parse_scriptlet_call("//scriptlet(abort-on-property-read, ads)");
        assert_eq!(parsed, Some(("abort-on-property-read".to_string(), vec!["ads".to_string()])));
    }
}
