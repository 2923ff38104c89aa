pub mod hybrid;
pub mod rrf;

pub use hybrid::{
    ContextItem, HybridSearchEngine, QueryConfig, QueryOptions, SearchResult, query_entity_terms,
};
pub use rrf::{DEFAULT_RRF_K, FusedItem, RankedList, fuse};
