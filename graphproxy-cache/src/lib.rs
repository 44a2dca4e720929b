pub mod dedup;
pub mod engine;
pub mod lru;

pub use dedup::DedupMap;
pub use engine::{
    CacheEngine, CacheEntry, EntryBody, GraphFetch, RequestCache, UpstreamResponse,
};
pub use lru::Lru;
