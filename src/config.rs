use derive_builder::Builder;

use crate::order_hash::MAX_CAPACITY;

/// One trading day of order ids.
pub const DEFAULT_CAPACITY: usize = 1_000_000;
pub const DEFAULT_COLLECT_THRESHOLD: usize = 256;
pub const DEFAULT_POOL_LIMIT: usize = 1024;

/// Construction parameters of a [`LookupTable`](crate::LookupTable).
///
/// ```
/// use order_table::config::TableConfigBuilder;
///
/// let config = TableConfigBuilder::default()
///     .capacity(4096)
///     .collect_threshold(64)
///     .build()
///     .unwrap();
/// assert_eq!(config.capacity(), 4096);
/// assert_eq!(config.pool_limit(), 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct TableConfig {
    /// Number of buckets. Fixed for the lifetime of the table.
    #[builder(default = "DEFAULT_CAPACITY")]
    capacity: usize,

    /// Retired nodes a thread accumulates before it tries to reclaim them
    #[builder(default = "DEFAULT_COLLECT_THRESHOLD")]
    collect_threshold: usize,

    /// Freed node blocks each thread keeps for reuse (0 disables recycling)
    #[builder(default = "DEFAULT_POOL_LIMIT")]
    pool_limit: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            capacity: DEFAULT_CAPACITY,
            collect_threshold: DEFAULT_COLLECT_THRESHOLD,
            pool_limit: DEFAULT_POOL_LIMIT,
        }
    }
}

impl TableConfig {
    pub fn builder() -> TableConfigBuilder {
        TableConfigBuilder::default()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn collect_threshold(&self) -> usize {
        self.collect_threshold
    }

    pub fn pool_limit(&self) -> usize {
        self.pool_limit
    }
}

impl TableConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.capacity == Some(0) {
            return Err("capacity must be greater than zero".into());
        }
        if let Some(capacity) = self.capacity
            && capacity > MAX_CAPACITY
        {
            return Err(format!("capacity must not exceed {MAX_CAPACITY}"));
        }
        if self.collect_threshold == Some(0) {
            return Err("collect_threshold must be greater than zero".into());
        }
        Ok(())
    }
}
