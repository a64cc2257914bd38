//! Compiles ABP/uBO-style filter lists into the UBX snapshot format the
//! matcher loads zero-copy, and wraps the result behind an `Engine` facade
//! that pages can query per request and per navigation.
//!
//! `parser` turns filter list text into `CompiledRule`/`CosmeticRule`,
//! `optimizer` folds duplicate and dominated rules before the `builder`
//! lays the surviving set out as UBX section bytes. `engine` is the runtime
//! entry point most callers want: it owns a `Matcher`/`CosmeticEngine` pair
//! behind an atomic swap and two bounded caches, reconfigurable without a
//! restart.

pub mod builder;
pub mod config;
pub mod engine;
pub mod optimizer;
pub mod parser;

pub use builder::build_snapshot;
pub use config::{ConfigError, EngineConfig, FilterSource, StealthConfig};
pub use engine::{
    CosmeticBundle, CosmeticResult, Engine, EngineError, EngineRequest, ScriptletCall,
};
pub use optimizer::{optimize_rules, OptimizeStats};
pub use parser::{parse_cosmetic_rules, parse_filter_list, CompiledRule, DomainConstraint};
