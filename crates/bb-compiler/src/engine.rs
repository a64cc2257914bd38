//! Engine facade: wraps the compiled `Matcher`/`Snapshot` pair behind a
//! `configure`/atomic-swap layer with two bounded result caches.
//!
//! Construction is single-writer: `start`/`configure` build a new
//! `EngineSnapshot` on the calling thread and install it with one
//! `ArcSwap::store`. Readers call `current.load()`, which hands back an
//! `Arc` clone — an in-flight `match_request` either sees the old snapshot
//! wholly or the new one wholly, never a mix, and the retired snapshot is
//! freed once its last reader drops its `Arc`.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use bb_core::cosmetic::{CosmeticEngine, CosmeticRule};
use bb_core::matcher::Matcher;
use bb_core::psl::{get_etld1, is_third_party};
use bb_core::snapshot::{Snapshot, SnapshotError};
use bb_core::types::{CosmeticKind, CosmeticOption, MatchResult, RequestContext, RequestType, SchemeMask};
use bb_core::url::{extract_host, extract_scheme};

use crate::builder::build_snapshot;
use crate::config::{ConfigError, EngineConfig};
use crate::optimizer::optimize_rules;
use crate::parser::{parse_cosmetic_rules, parse_filter_list, CompiledRule};

/// Rules processed per cooperative-yield step during the build phase.
pub const DEFAULT_CHUNK_SIZE: usize = 2_000;

const RESULT_CACHE_CAPACITY: usize = 100_000;
const SOURCE_CACHE_CAPACITY: usize = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// A request to match, as the facade's callers see it: owned strings rather
/// than the zero-copy slices `RequestContext` borrows internally.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub url: String,
    pub source_url: String,
    pub request_type: RequestType,
    pub tab_id: i32,
    pub frame_id: i32,
    pub request_id: String,
}

/// A scriptlet invocation with its argument list already split out, per the
/// injected-script call convention (`//scriptlet("name", "arg1", ...)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptletCall {
    pub name: String,
    pub args: Vec<String>,
}

/// Selectors/rules for one cosmetic class, split by specificity: generic
/// rules apply to every page a list covers, specific rules are scoped to a
/// hostname. A content script compiles generic rules once per site and
/// specific ones per navigation, hence the separate buckets.
#[derive(Debug, Clone, Default)]
pub struct CosmeticBundle {
    pub generic: Vec<String>,
    pub generic_ext_css: Vec<String>,
    pub specific: Vec<String>,
    pub specific_ext_css: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CosmeticResult {
    pub element_hide: CosmeticBundle,
    pub css_inject: CosmeticBundle,
    pub scriptlets: Vec<ScriptletCall>,
    pub js_injections: Vec<String>,
    pub html_filters: Vec<String>,
}

/// A fully built, immutable engine snapshot: a compiled rule set plus the
/// byte buffer it zero-copy borrows from. `snapshot` is declared first so it
/// drops before `bytes` is freed, even though neither holds a real
/// destructor that would observe the difference.
struct EngineSnapshot {
    snapshot: Snapshot<'static>,
    cosmetic: CosmeticEngine,
    rules_count: usize,
    config: EngineConfig,
    #[allow(dead_code)]
    bytes: Vec<u8>,
}

impl EngineSnapshot {
    /// A matcher over this snapshot with the configured trusted domains
    /// (bypass-all sites) applied.
    fn matcher(&self) -> Matcher<'_> {
        let mut matcher = Matcher::new(&self.snapshot);
        for domain in &self.config.trusted_domains {
            matcher.add_trusted_site(domain);
        }
        matcher
    }
}

impl EngineSnapshot {
    fn build(config: EngineConfig) -> Result<Arc<Self>, EngineError> {
        config.validate()?;

        let mut all_rules: Vec<CompiledRule> = Vec::new();
        let mut all_cosmetic: Vec<CosmeticRule> = Vec::new();

        for filter in &config.filters {
            let mut rules = parse_filter_list(&filter.content);
            for rule in &mut rules {
                rule.list_id = filter.filter_id as u16;
            }
            all_cosmetic.extend(parse_cosmetic_rules(&filter.content, filter.filter_id as u16));
            all_rules.extend(rules);
        }

        if !config.user_rules.is_empty() {
            let user_text = config.user_rules.join("\n");
            let mut rules = parse_filter_list(&user_text);
            for rule in &mut rules {
                rule.list_id = 0;
            }
            all_cosmetic.extend(parse_cosmetic_rules(&user_text, 0));
            all_rules.extend(rules);
        }

        yield_in_chunks(&all_rules, DEFAULT_CHUNK_SIZE);

        optimize_rules(&mut all_rules);
        let bytes = build_snapshot(&all_rules);

        let borrowed = Snapshot::load(&bytes)?;
        let rules_count = borrowed.rules().count;
        // SAFETY: `snapshot` borrows from `bytes`. Both are fields of this
        // struct, `bytes` is never mutated or reallocated after this point,
        // and `snapshot` is declared ahead of `bytes` so it drops first.
        let snapshot: Snapshot<'static> = unsafe { std::mem::transmute(borrowed) };

        let cosmetic = CosmeticEngine::build(&all_cosmetic);

        Ok(Arc::new(EngineSnapshot {
            snapshot,
            cosmetic,
            rules_count,
            config,
            bytes,
        }))
    }
}

/// Walks `rules` in chunks of `chunk_size`, yielding the OS thread after
/// each one. On a single-threaded cooperative scheduler this is strictly
/// observable (other tasks get a turn between chunks); on a parallel
/// scheduler it degrades to a harmless no-op yield.
fn yield_in_chunks(rules: &[CompiledRule], chunk_size: usize) {
    for _chunk in rules.chunks(chunk_size.max(1)) {
        std::thread::yield_now();
    }
}

/// Fixed-capacity cache with FIFO-with-refresh eviction: a hit moves its key
/// to the back of the order queue, a miss past capacity evicts the front.
struct BoundedCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), map: HashMap::new(), order: VecDeque::new() }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        let value = self.map.get(key).cloned()?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).expect("position just found");
            self.order.push_back(k);
        }
        Some(value)
    }

    fn insert(&mut self, key: K, value: V) {
        if self.map.contains_key(&key) {
            if let Some(pos) = self.order.iter().position(|k| k == &key) {
                self.order.remove(pos);
            }
        } else if self.map.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

/// Pushes the body of every entry of `kind` from `entries` into `out`.
fn route_selectors(entries: &[&bb_core::cosmetic::CosmeticEntry], kind: CosmeticKind, out: &mut Vec<String>) {
    for entry in entries {
        if entry.kind == kind {
            out.push(entry.body.clone());
        }
    }
}

type ResultCacheKey = (String, String, RequestType);

/// Engine facade. Wraps a `Matcher`/`Snapshot` pair behind `configure` and
/// two bounded result caches, both invalidated on reconfiguration.
pub struct Engine {
    current: ArcSwap<EngineSnapshot>,
    result_cache: Mutex<BoundedCache<ResultCacheKey, MatchResult>>,
    source_rule_cache: Mutex<BoundedCache<String, Option<i32>>>,
}

impl Engine {
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        let snapshot = EngineSnapshot::build(config)?;
        Ok(Self {
            current: ArcSwap::new(snapshot),
            result_cache: Mutex::new(BoundedCache::new(RESULT_CACHE_CAPACITY)),
            source_rule_cache: Mutex::new(BoundedCache::new(SOURCE_CACHE_CAPACITY)),
        })
    }

    /// Builds a new snapshot from `config` and installs it with a single
    /// atomic store. Readers mid-match against the old snapshot keep
    /// running against it via their own `Arc` clone.
    pub fn configure(&self, config: EngineConfig) -> Result<(), EngineError> {
        let next = EngineSnapshot::build(config)?;
        self.current.store(next);
        self.result_cache.lock().unwrap().clear();
        self.source_rule_cache.lock().unwrap().clear();
        Ok(())
    }

    /// Drops the engine. Any reader still holding an `Arc` from a prior
    /// `current.load()` keeps its snapshot alive until it finishes.
    pub fn stop(self) {}

    pub fn match_request(&self, request: &EngineRequest) -> MatchResult {
        let cache_key = (request.url.clone(), request.source_url.clone(), request.request_type);
        if let Some(cached) = self.result_cache.lock().unwrap().get(&cache_key) {
            return cached;
        }

        let current = self.current.load();
        let req_host = extract_host(&request.url).unwrap_or("");
        let req_etld1 = get_etld1(req_host);
        let site_host = extract_host(&request.source_url).unwrap_or("");
        let site_etld1 = get_etld1(site_host);
        let scheme = extract_scheme(&request.url).unwrap_or(SchemeMask::HTTPS);

        let ctx = RequestContext {
            url: &request.url,
            req_host,
            req_etld1: &req_etld1,
            site_host,
            site_etld1: &site_etld1,
            is_third_party: is_third_party(site_host, req_host),
            request_type: request.request_type,
            scheme,
            tab_id: request.tab_id,
            frame_id: request.frame_id,
            request_id: &request.request_id,
        };

        let matcher = current.matcher();
        let result = matcher.match_request(&ctx);

        self.result_cache.lock().unwrap().insert(cache_key, result.clone());
        result
    }

    /// Matches a top-level frame navigation and returns the `$document`
    /// exception rule id, if the frame's site is globally allowlisted.
    /// Cached by source URL, the same cache `get_cosmetic_result` callers
    /// typically probe right after a navigation.
    pub fn match_frame(&self, frame_url: &str) -> Option<i32> {
        if let Some(cached) = self.source_rule_cache.lock().unwrap().get(&frame_url.to_string()) {
            return cached;
        }

        let current = self.current.load();
        let host = extract_host(frame_url).unwrap_or("");
        let document_rule = current.matcher().match_document(host).map(|(rule_id, _)| rule_id);

        self.source_rule_cache
            .lock()
            .unwrap()
            .insert(frame_url.to_string(), document_rule);
        document_rule
    }

    /// Cosmetic rules/scriptlets still permitted for `url`, after narrowing
    /// by whatever `$elemhide`/`$generichide`/`$specifichide`/`$document`
    /// exception matched the page itself.
    pub fn get_cosmetic_result(&self, url: &str) -> CosmeticResult {
        let current = self.current.load();
        let host = extract_host(url).unwrap_or("");
        let option = current.matcher().cosmetic_option_for_site(host);

        let mut result = CosmeticResult::default();
        if option.is_empty() {
            return result;
        }

        let lookup = current.cosmetic.lookup(
            host,
            url,
            !option.contains(CosmeticOption::GENERIC),
            !option.contains(CosmeticOption::SPECIFIC),
        );

        if option.contains(CosmeticOption::ELEMENT_HIDING) {
            route_selectors(&lookup.generic, CosmeticKind::ElementHide, &mut result.element_hide.generic);
            route_selectors(&lookup.generic_ext_css, CosmeticKind::ElementHide, &mut result.element_hide.generic_ext_css);
            route_selectors(&lookup.specific, CosmeticKind::ElementHide, &mut result.element_hide.specific);
            route_selectors(&lookup.specific_ext_css, CosmeticKind::ElementHide, &mut result.element_hide.specific_ext_css);
        }
        if option.contains(CosmeticOption::CSS) {
            route_selectors(&lookup.generic, CosmeticKind::CssInject, &mut result.css_inject.generic);
            route_selectors(&lookup.generic_ext_css, CosmeticKind::CssInject, &mut result.css_inject.generic_ext_css);
            route_selectors(&lookup.specific, CosmeticKind::CssInject, &mut result.css_inject.specific);
            route_selectors(&lookup.specific_ext_css, CosmeticKind::CssInject, &mut result.css_inject.specific_ext_css);
        }
        if option.contains(CosmeticOption::JS) {
            for entry in lookup.generic.iter().chain(&lookup.specific) {
                match entry.kind {
                    CosmeticKind::Scriptlet => {
                        if let Some((name, args)) = entry.scriptlet_call() {
                            result.scriptlets.push(ScriptletCall { name, args });
                        }
                    }
                    CosmeticKind::JsInject => result.js_injections.push(entry.body.clone()),
                    _ => {}
                }
            }
        }
        if option.contains(CosmeticOption::HTML) {
            for entry in lookup.generic.iter().chain(&lookup.specific) {
                if entry.kind == CosmeticKind::HtmlFilter {
                    result.html_filters.push(entry.body.clone());
                }
            }
        }

        result
    }

    pub fn get_rules_count(&self) -> usize {
        self.current.load().rules_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterSource;

    fn config_from(content: &str) -> EngineConfig {
        EngineConfig {
            filters: vec![FilterSource { filter_id: 1, content: content.to_string(), trusted: false }],
            ..Default::default()
        }
    }

    #[test]
    fn start_builds_matchable_engine() {
        let engine = Engine::start(config_from("||ads.example.com^\n")).unwrap();
        assert_eq!(engine.get_rules_count(), 1);

        let result = engine.match_request(&EngineRequest {
            url: "https://ads.example.com/banner.js".to_string(),
            source_url: "https://news.example.com/".to_string(),
            request_type: RequestType::SCRIPT,
            tab_id: 1,
            frame_id: 0,
            request_id: "r1".to_string(),
        });
        assert!(matches!(result.decision, bb_core::types::MatchDecision::Block));
    }

    #[test]
    fn configure_invalidates_caches_and_swaps_rules() {
        let engine = Engine::start(config_from("||ads.example.com^\n")).unwrap();
        let request = EngineRequest {
            url: "https://ads.example.com/banner.js".to_string(),
            source_url: "https://news.example.com/".to_string(),
            request_type: RequestType::SCRIPT,
            tab_id: 1,
            frame_id: 0,
            request_id: "r1".to_string(),
        };
        assert!(matches!(engine.match_request(&request).decision, bb_core::types::MatchDecision::Block));

        engine.configure(config_from("||tracker.example.com^\n")).unwrap();
        assert!(matches!(engine.match_request(&request).decision, bb_core::types::MatchDecision::Allow));
    }

    #[test]
    fn duplicate_filter_id_is_rejected_before_build() {
        let config = EngineConfig {
            filters: vec![
                FilterSource { filter_id: 1, content: String::new(), trusted: false },
                FilterSource { filter_id: 1, content: String::new(), trusted: false },
            ],
            ..Default::default()
        };
        assert!(matches!(Engine::start(config), Err(EngineError::Config(ConfigError::DuplicateFilterId(1)))));
    }

    #[test]
    fn cosmetic_result_splits_by_kind() {
        let engine = Engine::start(config_from("example.com##.ad-banner\n")).unwrap();
        let result = engine.get_cosmetic_result("https://example.com/");
        assert_eq!(result.element_hide.specific, vec![".ad-banner".to_string()]);
        assert!(result.css_inject.specific.is_empty());
    }

    #[test]
    fn document_exception_empties_cosmetic_result() {
        let engine = Engine::start(config_from(
            "example.com##.ad-banner\n@@||example.com^$document\n",
        ))
        .unwrap();
        let result = engine.get_cosmetic_result("https://example.com/");
        assert!(result.element_hide.specific.is_empty());
        assert!(result.element_hide.generic.is_empty());
    }

    #[test]
    fn scriptlet_entries_route_to_scriptlets_not_js_injections() {
        let engine = Engine::start(config_from(
            "example.com#%#//scriptlet('abort-on-property-read', 'ads')\n",
        ))
        .unwrap();
        let result = engine.get_cosmetic_result("https://example.com/");
        assert_eq!(result.scriptlets.len(), 1);
        assert_eq!(result.scriptlets[0].name, "abort-on-property-read");
        assert_eq!(result.scriptlets[0].args, vec!["ads".to_string()]);
        assert!(result.js_injections.is_empty());
    }
}
