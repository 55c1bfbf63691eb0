//! Response caching.
//!
//! Submodules:
//! - `store`: The cache itself: exact keys, similarity fallback, TTL, eviction
//! - `similarity`: Weighted token Jaccard scoring with the antonym guard
//! - `lexicon`: Word-class tables backing the similarity weights

pub mod lexicon;
pub mod similarity;
pub mod store;

// Re-exports for convenience
pub use similarity::similarity;
pub use store::{
    cache_key, CacheBackend, CacheEntry, CacheError, CacheHit, CacheOptions, MatchKind,
    MemoryBackend, ResponseCache,
};
