//! Engine configuration shape and validation.
//!
//! `EngineConfig` is the single source of truth `Engine::start`/`configure`
//! build from; it is plain data so it can be loaded from TOML/JSON or built
//! in-process. Validation happens before any rule is parsed, per the rule
//! that invalid configuration shape is the only class of fatal error the
//! build phase can raise.

use std::collections::HashSet;

use serde::Deserialize;

/// One static filter list as handed to the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterSource {
    pub filter_id: u32,
    pub content: String,
    #[serde(default)]
    pub trusted: bool,
}

/// Stealth-mode toggles. Cookie self-destruct durations are in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StealthConfig {
    pub hide_referrer: bool,
    pub hide_search_queries: bool,
    pub send_do_not_track: bool,
    pub block_webrtc: bool,
    pub self_destruct_first_party_cookies: bool,
    pub self_destruct_first_party_cookies_time: Option<u64>,
    pub self_destruct_third_party_cookies: bool,
    pub self_destruct_third_party_cookies_time: Option<u64>,
    pub block_chrome_client_data: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub filters: Vec<FilterSource>,
    /// User-provided rules, implicitly filter id 0.
    pub user_rules: Vec<String>,
    pub allowlist: Vec<String>,
    pub allowlist_enabled: bool,
    /// When true, the allowlist is inverted: the engine blocks everywhere
    /// except the listed sites.
    pub allowlist_inverted: bool,
    /// Domains exempt from unsafe-rule restrictions (e.g. `$removeheader`).
    pub trusted_domains: Vec<String>,
    pub stealth: StealthConfig,
    pub verbose: bool,
    pub collect_stats: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate filter_id {0} in configuration")]
    DuplicateFilterId(u32),
    #[error("stealth duration '{field}' must be a positive number of seconds, got {value}")]
    InvalidStealthDuration { field: &'static str, value: u64 },
    #[error("allowlist/trusted-domain entry '{0}' is not a valid hostname")]
    InvalidHostEntry(String),
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_ids = HashSet::new();
        for filter in &self.filters {
            if !seen_ids.insert(filter.filter_id) {
                return Err(ConfigError::DuplicateFilterId(filter.filter_id));
            }
        }

        if let Some(secs) = self.stealth.self_destruct_first_party_cookies_time {
            if secs == 0 {
                return Err(ConfigError::InvalidStealthDuration {
                    field: "self_destruct_first_party_cookies_time",
                    value: secs,
                });
            }
        }
        if let Some(secs) = self.stealth.self_destruct_third_party_cookies_time {
            if secs == 0 {
                return Err(ConfigError::InvalidStealthDuration {
                    field: "self_destruct_third_party_cookies_time",
                    value: secs,
                });
            }
        }

        for host in self.allowlist.iter().chain(self.trusted_domains.iter()) {
            if host.trim().is_empty() || host.chars().any(char::is_whitespace) {
                return Err(ConfigError::InvalidHostEntry(host.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn duplicate_filter_id_rejected() {
        let config = EngineConfig {
            filters: vec![
                FilterSource { filter_id: 1, content: String::new(), trusted: false },
                FilterSource { filter_id: 1, content: String::new(), trusted: false },
            ],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateFilterId(1))));
    }

    #[test]
    fn zero_second_stealth_duration_rejected() {
        let config = EngineConfig {
            stealth: StealthConfig {
                self_destruct_first_party_cookies_time: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStealthDuration { .. })));
    }

    #[test]
    fn blank_allowlist_host_rejected() {
        let config = EngineConfig {
            allowlist: vec!["   ".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHostEntry(_))));
    }
}
