//! Surrogate id sequencer.

/// Hands out monotonically increasing ids.
///
/// `current` is the last id handed out; `next` advances it. Transactions
/// snapshot `current` on begin and reset it on rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequencer {
    current: u64,
}

impl Sequencer {
    /// Creates a sequencer whose first `next()` returns `first`.
    #[must_use]
    pub fn new(first: u64) -> Self {
        Self {
            current: first.max(1) - 1,
        }
    }

    /// Advances and returns the next id.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    /// The last id handed out.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Sets the last id handed out.
    pub fn reset(&mut self, current: u64) {
        self.current = current;
    }

    /// Raises the sequencer to at least `id`; never lowers it.
    pub fn update(&mut self, id: u64) -> u64 {
        self.current = self.current.max(id);
        self.current
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(1)
    }
}
