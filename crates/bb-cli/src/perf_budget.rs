//! A pass/fail gate for CI: compiles (or loads) a snapshot and checks its
//! size, cold-start time, match latency, and cosmetic-lookup latency against
//! fixed budgets, exiting non-zero if any one is exceeded.

use std::path::Path;
use std::time::Instant;

use bb_core::matcher::Matcher;
use bb_core::psl::get_etld1;
use bb_core::snapshot::Snapshot;
use bb_core::types::{MatchDecision, RequestContext, RequestType, SchemeMask};
use bb_core::url::{extract_host, extract_scheme};

use crate::snapshot;

pub struct PerfBudgetOptions {
    pub input_paths: Vec<String>,
    pub snapshot_path: String,
    pub compile: bool,
}

struct BudgetRequest {
    url: String,
    request_type: String,
    initiator: Option<String>,
}

const BUDGET_COLD_START_MS: f64 = 500.0;
const BUDGET_MEMORY_PEAK_MB: f64 = 50.0;
const BUDGET_MATCH_P99_US: f64 = 1000.0;
const BUDGET_COSMETIC_P99_US: f64 = 500.0;
const BUDGET_SNAPSHOT_MB: f64 = 30.0;

pub fn run_perf_budget(opts: PerfBudgetOptions) -> Result<(), String> {
    println!("Performance Budget Check");
    println!("==================================================");

    let snapshot_path = Path::new(&opts.snapshot_path);
    let snapshot_bytes = if opts.compile {
        let (bytes, stats) = snapshot::compile_snapshot_bytes(&opts.input_paths, false)?;
        snapshot::write_snapshot(snapshot_path, &bytes)?;
        println!("Compiled {} list(s): {} -> {} rules", opts.input_paths.len(), stats.rules_before, stats.rules_after);
        bytes
    } else {
        snapshot::read_snapshot(snapshot_path)?
    };

    let snapshot_size_mb = snapshot_bytes.len() as f64 / (1024.0 * 1024.0);

    println!("Loading snapshot...");
    let cold_start_begin = Instant::now();
    let snapshot = Snapshot::load(&snapshot_bytes).map_err(|e| format!("Invalid snapshot: {}", e))?;
    let matcher = Matcher::new(&snapshot);
    let cold_start_ms = cold_start_begin.elapsed().as_secs_f64() * 1000.0;

    println!("Warming up...");
    let warm_req = BudgetRequest {
        url: "https://example.com/test".to_string(),
        request_type: "script".to_string(),
        initiator: Some("https://example.com".to_string()),
    };
    for _ in 0..1000 {
        let _ = should_block(&matcher, &warm_req);
        let _ = matcher.cosmetic_option_for_site("example.com");
    }

    println!("Measuring match latency...");
    let match_latencies = measure_match_latency(&matcher, 2000);
    let match_p99_us = percentile(&match_latencies, 0.99);

    println!("Measuring cosmetic permission latency...");
    let cosmetic_latencies = measure_cosmetic_latency(&matcher, 2000);
    let cosmetic_p99_us = percentile(&cosmetic_latencies, 0.99);

    // Snapshot bytes are mmap'd read-only, so the snapshot size doubles as a
    // proxy for resident memory until a real heap profiler is wired in.
    let resident_peak_mb = snapshot_size_mb;

    let mut passed = true;
    println!();
    println!("Results");
    println!("--------------------------------------------------");

    passed &= report_budget("Snapshot Size", snapshot_size_mb, BUDGET_SNAPSHOT_MB, "MB");
    passed &= report_budget("Cold Start", cold_start_ms, BUDGET_COLD_START_MS, "ms");
    passed &= report_budget("Match P99 Latency", match_p99_us, BUDGET_MATCH_P99_US, "\u{3bc}s");
    passed &= report_budget("Cosmetic Lookup P99 Latency", cosmetic_p99_us, BUDGET_COSMETIC_P99_US, "\u{3bc}s");
    passed &= report_budget("Resident Memory Peak", resident_peak_mb, BUDGET_MEMORY_PEAK_MB, "MB");

    println!();
    println!("==================================================");

    if passed {
        println!("All performance budgets passed");
        Ok(())
    } else {
        Err("Performance budget exceeded".to_string())
    }
}

fn report_budget(name: &str, actual: f64, limit: f64, unit: &str) -> bool {
    let passed = actual <= limit;
    let status = if passed { "PASS" } else { "FAIL" };
    println!("[{}] {}: {:.2} {} (limit: {:.2} {})", status, name, actual, unit, limit, unit);
    passed
}

fn sample_requests() -> [BudgetRequest; 5] {
    [
        BudgetRequest {
            url: "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js".to_string(),
            request_type: "script".to_string(),
            initiator: Some("https://example.com".to_string()),
        },
        BudgetRequest {
            url: "https://www.google-analytics.com/analytics.js".to_string(),
            request_type: "script".to_string(),
            initiator: Some("https://example.com".to_string()),
        },
        BudgetRequest {
            url: "https://example.com/style.css".to_string(),
            request_type: "stylesheet".to_string(),
            initiator: Some("https://example.com".to_string()),
        },
        BudgetRequest {
            url: "https://cdn.example.com/image.png".to_string(),
            request_type: "image".to_string(),
            initiator: Some("https://example.com".to_string()),
        },
        BudgetRequest {
            url: "https://api.example.com/data.json".to_string(),
            request_type: "xmlhttprequest".to_string(),
            initiator: Some("https://example.com".to_string()),
        },
    ]
}

fn measure_match_latency(matcher: &Matcher, iterations: usize) -> Vec<f64> {
    let test_urls = sample_requests();
    let mut latencies = Vec::new();

    for _ in 0..iterations {
        for req in &test_urls {
            let start = Instant::now();
            let _ = should_block(matcher, req);
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
        }
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    latencies
}

/// Measures `cosmetic_option_for_site`, the once-per-navigation page check
/// a content script runs before it asks for element-hide/CSS/scriptlet
/// entries, separately from the per-subrequest `match_request` path above.
fn measure_cosmetic_latency(matcher: &Matcher, iterations: usize) -> Vec<f64> {
    const SITES: &[&str] = &["example.com", "news.example.com", "shop.example.com"];
    let mut latencies = Vec::new();

    for _ in 0..iterations {
        for site in SITES {
            let start = Instant::now();
            let _ = matcher.cosmetic_option_for_site(site);
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
        }
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    latencies
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

fn should_block(matcher: &Matcher, req: &BudgetRequest) -> bool {
    match_request(matcher, req).decision == MatchDecision::Block
}

fn match_request(matcher: &Matcher, req: &BudgetRequest) -> bb_core::types::MatchResult {
    let req_host = extract_host(&req.url).unwrap_or("");
    let req_etld1 = get_etld1(req_host);

    let is_main_frame = req.request_type == "main_frame" || req.request_type == "document";
    let site_url = if is_main_frame {
        req.url.as_str()
    } else {
        req.initiator.as_deref().unwrap_or(req.url.as_str())
    };
    let site_host = extract_host(site_url).unwrap_or(req_host);
    let site_etld1 = get_etld1(site_host);

    let scheme = extract_scheme(&req.url).unwrap_or(SchemeMask::HTTP);
    let is_third_party = !site_etld1.is_empty() && req_etld1 != site_etld1;
    let request_type = RequestType::from_str(&req.request_type);

    let ctx = RequestContext {
        url: &req.url,
        req_host,
        req_etld1: &req_etld1,
        site_host,
        site_etld1: &site_etld1,
        is_third_party,
        request_type,
        scheme,
        tab_id: 1,
        frame_id: 0,
        request_id: "perf",
    };

    matcher.match_request(&ctx)
}
