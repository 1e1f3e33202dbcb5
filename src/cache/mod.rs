//! Per-context caches.
//!
//! - **Query cache** (`query_cache`): answers of atomic queries, keyed by
//!   alpha-equivalence class
//! - **Rule cache** (`rule_cache`): which rules could conclude a fact of a
//!   given atom shape

pub mod query_cache;
pub mod rule_cache;

pub use query_cache::{CacheKey, CacheSlot, CacheStats, QueryCache};
pub use rule_cache::RuleCache;
