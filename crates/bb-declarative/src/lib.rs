//! BetterBlocker Declarative Converter
//!
//! Lowers parsed network rules into the condition/action rule shape a
//! browser-native declarative rule engine consumes, independent of the
//! runtime matcher in `bb-core`.

pub mod convert;
pub mod hashmap;
pub mod rule;

pub use convert::{
    convert_dynamic_rulesets, convert_static_ruleset, ConversionError, ConversionOptions,
    ConversionResult, DeclarativeRule, LimitationError, StaticRuleSet,
};
pub use hashmap::RulesHashMap;
pub use rule::{parse_network_rules, NetworkRule};
