//! Cache-aside reads over the hot store.

pub mod cache_aside;

pub use cache_aside::{with_cache_aside, CacheAside, CacheStats, CacheValue, FnLoader, SourceLoader};
