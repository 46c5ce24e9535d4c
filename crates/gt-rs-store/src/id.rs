use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe serial id allocator, one per table.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Allocator that continues after the highest id already persisted.
    pub fn after<I: IntoIterator<Item = u64>>(existing: I) -> Self {
        let max = existing.into_iter().max().unwrap_or(0);
        Self::new(max + 1)
    }

    /// Allocate the next unique id.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Current value (next id that will be allocated).
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}
