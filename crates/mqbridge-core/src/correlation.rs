//! Correlation identifiers for in-flight commands.
//!
//! Every submit cycle carries a fresh identifier so a completion can always be
//! traced back to the exact submission that caused it, including across
//! retries of the same logical call.

use std::fmt;
use std::sync::Mutex;

/// Token tying a submitted command to its eventual completion.
///
/// Unique for the lifetime of the allocator that produced it; never reused
/// while any bridge call referencing it is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Raw counter value, mainly for logging.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produces strictly increasing [`CorrelationId`]s under mutual exclusion.
///
/// Wraparound is not handled; a u64 outlives any realistic operation count.
#[derive(Debug, Default)]
pub struct CorrelationAllocator {
    next: Mutex<u64>,
}

impl CorrelationAllocator {
    /// Create an allocator starting at id 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier. Never returns the same value twice.
    pub fn next(&self) -> CorrelationId {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        *next += 1;
        CorrelationId(*next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ids_strictly_increase() {
        let allocator = CorrelationAllocator::new();
        let a = allocator.next();
        let b = allocator.next();
        let c = allocator.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let allocator = Arc::new(CorrelationAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let allocator = allocator.clone();
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| allocator.next().value()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("allocator thread panicked"))
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
