use std::sync::atomic::{AtomicU32, Ordering};

use crate::packet::SEQUENCE_MASK;

/// Hands out sequence numbers for client requests: 0, 1, 2, ... wrapping
/// back to 0 after `2^30 - 1`.
///
/// Each [Client](crate::client::Client) gets a fresh allocator by default.
/// Share one behind an `Arc` through
/// [ClientConfig::with_sequences](crate::config::ClientConfig::with_sequences)
/// to keep counting across reconnects.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    next: AtomicU32,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(sequence: u32) -> Self {
        SequenceAllocator {
            next: AtomicU32::new(sequence & SEQUENCE_MASK),
        }
    }

    /// Returns the next sequence number and advances the counter.
    pub fn allocate(&self) -> u32 {
        // fetch_update only fails if the closure returns None
        match self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.wrapping_add(1) & SEQUENCE_MASK)
            }) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    /// Moves the counter, so tests can reach a wraparound without 2^30
    /// allocations.
    #[cfg(test)]
    pub(crate) fn rewind(&self, sequence: u32) {
        self.next.store(sequence & SEQUENCE_MASK, Ordering::Relaxed);
    }

    /// The value the next call to [allocate](Self::allocate) will return.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}
