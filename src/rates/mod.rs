//! Central-bank rates: feed fetching, parsed table, in-memory cache

pub mod cache;
pub mod feed;
pub mod table;

// Re-exports for convenience
pub use cache::RateCache;
pub use table::{Currency, RateTable, BASE_CODE};
