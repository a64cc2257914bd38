use std::collections::HashMap;
use std::fs;
use std::path::Path;

use bb_declarative::{convert_static_ruleset, parse_network_rules, ConversionOptions};
use serde::Serialize;
use serde_json::Value;

pub struct DeclarativeOptions {
    pub input_paths: Vec<String>,
    pub output: String,
    pub max_rules: usize,
    pub max_regex_rules: usize,
}

#[derive(Serialize)]
struct DeclarativeOutput {
    id: String,
    rules_count: usize,
    regexp_rules_count: usize,
    declarative_rules: Vec<Value>,
    source_map: HashMap<String, Vec<(u16, usize)>>,
    rules_hash_map: Vec<(u64, Vec<(u16, usize)>)>,
    bad_filter_rules: Vec<String>,
}

pub fn run_declarative(opts: DeclarativeOptions) -> Result<(), String> {
    if opts.input_paths.is_empty() {
        return Err("No input files specified".to_string());
    }

    let mut id_offset = 1u32;
    let mut all_declarative = Vec::new();
    let mut all_errors = Vec::new();
    let mut source_map = HashMap::new();
    let mut hash_entries = Vec::new();
    let mut bad_filter_rules = Vec::new();
    let mut regexp_count = 0usize;

    for (filter_id, path) in opts.input_paths.iter().enumerate() {
        let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        let rules = parse_network_rules(&content);

        let options = ConversionOptions {
            filter_id: filter_id as u16,
            max_rules: opts.max_rules,
            max_regex_rules: opts.max_regex_rules,
            id_offset,
            redirect_resources: HashMap::new(),
        };

        let result = convert_static_ruleset(&rules, &options);

        println!(
            "[{}] {} - {} rules -> {} declarative ({} errors, {} badfilter)",
            filter_id,
            Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
            rules.len(),
            result.rules.len(),
            result.errors.len(),
            result.bad_filter_rules.len(),
        );

        id_offset += rules.len() as u32;
        regexp_count += result
            .rules
            .iter()
            .filter(|r| r.condition.regex_filter.is_some())
            .count();

        for rule in &result.rules {
            source_map.insert(rule.id.to_string(), result.source_map[&rule.id].clone());
            all_declarative.push(serde_json::to_value(rule).map_err(|e| e.to_string())?);
        }
        hash_entries.extend(result.rules_hash_map.into_entries());
        bad_filter_rules.extend(result.bad_filter_rules);
        all_errors.extend(result.errors);
    }

    if !all_errors.is_empty() {
        println!("Conversion errors: {}", all_errors.len());
        for err in all_errors.iter().take(10) {
            println!("  - {}", err);
        }
    }

    let output = DeclarativeOutput {
        id: "betterblocker".to_string(),
        rules_count: all_declarative.len(),
        regexp_rules_count: regexp_count,
        declarative_rules: all_declarative,
        source_map,
        rules_hash_map: hash_entries,
        bad_filter_rules,
    };

    let json = serde_json::to_string_pretty(&output).map_err(|e| format!("Failed to serialize JSON: {}", e))?;
    if let Some(parent) = Path::new(&opts.output).parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    fs::write(&opts.output, json).map_err(|e| format!("Failed to write '{}': {}", opts.output, e))?;

    println!("Wrote {}", opts.output);
    Ok(())
}
