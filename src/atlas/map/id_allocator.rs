//! Thread-safe monotonically increasing id generator.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out strictly increasing `u64` ids.
///
/// Owned by a [`Map`](super::Map) rather than living in a global, so separate
/// SLAM sessions never share counters. The counter is never rewound.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The id the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Ensure every future id is greater than `id`.
    pub fn advance_past(&self, id: u64) {
        self.next.fetch_max(id.saturating_add(1), Ordering::SeqCst);
    }
}
