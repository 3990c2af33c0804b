//! Device id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::DeviceId;

/// Hands out strictly increasing device ids.
///
/// Ids are never reused. The counter is 64 bits wide, so exhaustion is not
/// a practical concern and allocation cannot fail.
#[derive(Debug)]
pub struct DeviceIdAllocator {
    next: AtomicU64,
}

impl Default for DeviceIdAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeviceIdAllocator {
    /// Create an allocator whose first id is `base`.
    pub fn new(base: u64) -> Self {
        Self {
            next: AtomicU64::new(base),
        }
    }

    /// Allocate the next id.
    pub fn allocate(&self) -> DeviceId {
        DeviceId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The id the next call to [`allocate`](Self::allocate) will return.
    pub fn peek(&self) -> DeviceId {
        DeviceId(self.next.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequential_ids_strictly_increase() {
        let alloc = DeviceIdAllocator::new(5);
        let ids: Vec<_> = (0..100).map(|_| alloc.allocate()).collect();
        assert_eq!(ids[0], DeviceId(5));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(alloc.peek(), DeviceId(105));
    }

    #[test]
    fn test_concurrent_ids_unique() {
        let alloc = Arc::new(DeviceIdAllocator::default());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    let ids: Vec<_> = (0..500).map(|_| alloc.allocate()).collect();
                    assert!(ids.windows(2).all(|w| w[0] < w[1]));
                    ids
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for worker in workers {
            for id in worker.join().unwrap() {
                assert!(seen.insert(id), "duplicate device id {id}");
            }
        }
        assert_eq!(seen.len(), 8 * 500);
    }
}
