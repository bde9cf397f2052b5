pub mod dag; // DAG compiler, interpreter and execution backends
pub mod pipeline; // Scan collection, timeout and cancellation around the engine
pub mod result_cache; // Terminal output cache with LRU and TTL

pub use pipeline::*;
pub use result_cache::*;
