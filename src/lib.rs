//! Lock-free order-id lookup table.
//!
//! A fixed number of buckets, each a lock-free chain, addressed by a triple
//! multiplicative hash of the order id. Erased nodes are reclaimed through
//! epoch-based reclamation and their storage is recycled per thread.

use once_cell::sync::Lazy;

pub mod config;
pub mod epoch_manager;
pub mod error;
pub mod lookup_table;
mod node;
pub mod node_allocator;
pub mod order_hash;

pub use config::{TableConfig, TableConfigBuilder};
pub use epoch_manager::Guard;
pub use error::{Error, Result};
pub use lookup_table::LookupTable;
pub use order_hash::{OrderHasher, OrderId};

/// Alignment for cache lines (typically 64 bytes on modern CPUs)
pub(crate) static CACHE_LINE_SIZE: Lazy<usize> = Lazy::new(|| {
    // Try data cache first (most relevant for our use case)
    cache_size::cache_line_size(1, cache_size::CacheType::Data)
        // Fall back to unified cache if data cache info isn't available
        .or_else(|| cache_size::cache_line_size(1, cache_size::CacheType::Unified))
        // Try L2 cache if L1 isn't available
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Data))
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Unified))
        // Default to 64 bytes if all detection fails
        .unwrap_or(64)
});
