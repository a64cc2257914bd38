//! Extracts a deduplicated hostname corpus from one or more filter lists,
//! for feeding synthetic traffic into `bench`'s realistic mode.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub struct StressHostsOptions {
    pub inputs: Vec<String>,
    pub output: String,
}

pub fn run_generate_hosts(opts: StressHostsOptions) -> Result<(), String> {
    let sources = if opts.inputs.is_empty() {
        vec![default_input_path()?]
    } else {
        opts.inputs.iter().map(PathBuf::from).collect()
    };

    let mut domains = BTreeSet::new();
    let mut total_lines = 0usize;

    for source in &sources {
        let content = fs::read_to_string(source)
            .map_err(|e| format!("Failed to read '{}': {}", source.display(), e))?;
        let lines = content.lines();
        total_lines += lines.clone().count();

        for line in lines {
            if let Some(domain) = extract_domain(line) {
                if is_usable_host(domain) {
                    domains.insert(domain.to_string());
                }
            }
        }
    }

    let output_path = PathBuf::from(&opts.output);
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }

    let out_vec: Vec<String> = domains.into_iter().collect();
    let json = serde_json::to_string_pretty(&out_vec)
        .map_err(|e| format!("Failed to serialize JSON: {}", e))?;
    fs::write(&output_path, json)
        .map_err(|e| format!("Failed to write '{}': {}", output_path.display(), e))?;

    println!("Generated {}", output_path.display());
    println!("Source files: {}", sources.len());
    println!("Source lines: {}", total_lines);
    println!("Unique hosts: {}", out_vec.len());

    Ok(())
}

/// Pulls a candidate hostname out of one filter list line: a `||host^`
/// network anchor, a hosts-file `0.0.0.0 host` entry, or the hostname scope
/// of a `host##selector` cosmetic rule. Allowlist (`@@`) and comment/section
/// lines never yield a host, since they describe an exception rather than a
/// blocked destination worth exercising in a benchmark.
fn extract_domain(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('!') || trimmed.starts_with('[') || trimmed.starts_with("@@") {
        return None;
    }

    if let Some(rest) = trimmed.strip_prefix("||") {
        let end = rest.find(['^', '/']).unwrap_or(rest.len());
        let domain = &rest[..end];
        return if domain.is_empty() { None } else { Some(domain) };
    }

    if let Some(rest) = trimmed.strip_prefix("0.0.0.0 ").or_else(|| trimmed.strip_prefix("127.0.0.1 ")) {
        return rest.split_whitespace().next();
    }

    if let Some(sep_pos) = trimmed.find("##") {
        let scope = &trimmed[..sep_pos];
        if !scope.is_empty() && !scope.contains(['$', '*', '/']) {
            return scope.split(',').next();
        }
    }

    None
}

/// Rejects wildcard scopes and bare labels that wouldn't resolve as a real
/// host, so the generated corpus only exercises realistic lookups.
fn is_usable_host(domain: &str) -> bool {
    domain.contains('.') && !domain.contains('*')
}

fn default_input_path() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to resolve cwd: {}", e))?;
    Ok(Path::new(&cwd).join("filters.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_network_anchor_hosts() {
        assert_eq!(extract_domain("||ads.example.com^"), Some("ads.example.com"));
        assert_eq!(extract_domain("||ads.example.com/path"), Some("ads.example.com"));
    }

    #[test]
    fn extracts_hosts_file_entries() {
        assert_eq!(extract_domain("0.0.0.0 tracker.example.com"), Some("tracker.example.com"));
        assert_eq!(extract_domain("127.0.0.1 tracker.example.com"), Some("tracker.example.com"));
    }

    #[test]
    fn extracts_cosmetic_rule_scope() {
        assert_eq!(extract_domain("example.com##.ad-banner"), Some("example.com"));
        assert_eq!(extract_domain("example.com,other.com##.ad-banner"), Some("example.com"));
    }

    #[test]
    fn skips_comments_allowlists_and_generic_cosmetics() {
        assert_eq!(extract_domain("! a comment"), None);
        assert_eq!(extract_domain("@@||example.com^"), None);
        assert_eq!(extract_domain("##.ad-banner"), None);
        assert_eq!(extract_domain("[Adblock Plus 2.0]"), None);
    }

    #[test]
    fn rejects_wildcard_and_bare_hosts() {
        assert!(!is_usable_host("*"));
        assert!(!is_usable_host("localhost"));
        assert!(is_usable_host("example.com"));
    }
}
