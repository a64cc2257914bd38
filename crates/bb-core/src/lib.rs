//! The matching engine: a request's `(url, site, type)` in, a decision plus
//! cosmetic permissions out, against a pre-compiled UBX snapshot. `no_std` +
//! `alloc` so the same crate can back a native CLI and a WASM content
//! script without duplicating the matcher.
//!
//! The hot path (`matcher::match_request`) never allocates: `snapshot`
//! hands back zero-copy views into the loaded byte buffer, `url` slices the
//! request string in place, and `hash`/`psl` key everything by `u64`
//! domain/pattern hashes rather than owned strings.
//!
//! - `hash` — Murmur3 domain/pattern/token hashing shared across the crate
//! - `psl` — eTLD+1 extraction (site vs. subdomain, third-party checks)
//! - `snapshot` — UBX binary format and its zero-copy loader
//! - `url` — scheme/host/path extraction and tokenization, no allocations
//! - `matcher` — network rule matching plus page-exception combinators
//! - `cosmetic` — hostname-keyed element-hide/CSS/scriptlet/HTML rule store
//! - `types` — shared flag/enum/struct definitions

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod cosmetic;
pub mod hash;
pub mod matcher;
pub mod psl;
pub mod snapshot;
pub mod types;
pub mod url;

pub use hash::{hash64, hash_domain, hash_pattern, hash_token, Hash64};
pub use matcher::Matcher;
pub use psl::{get_etld1, is_third_party};
pub use snapshot::Snapshot;
pub use types::{CosmeticOption, MatchDecision, MatchResult, RequestContext, RequestType, RuleAction};
