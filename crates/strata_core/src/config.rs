//! Object store configuration.

/// Configuration for an [`ObjectStore`](crate::ObjectStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// First surrogate id handed out by the store's sequencer.
    pub first_id: u64,

    /// Initial capacity in bytes of each backup buffer.
    pub backup_capacity: usize,

    /// Maximum number of transactions stacked on one store.
    pub max_nesting_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            first_id: 1,
            backup_capacity: 256,
            max_nesting_depth: 16,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the first id handed out. `0` is reserved and treated as `1`.
    #[must_use]
    pub const fn first_id(mut self, id: u64) -> Self {
        self.first_id = if id == 0 { 1 } else { id };
        self
    }

    /// Sets the initial backup buffer capacity.
    #[must_use]
    pub const fn backup_capacity(mut self, bytes: usize) -> Self {
        self.backup_capacity = bytes;
        self
    }

    /// Sets the maximum transaction nesting depth.
    #[must_use]
    pub const fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }
}
