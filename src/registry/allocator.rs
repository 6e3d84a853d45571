//! Shared stream id allocator
//!
//! Hands out ids from `1..=capacity`, lowest free first. An id goes back
//! into the pool only through [`StreamIdAllocator::restore`], which the
//! owning connection calls when it closes.

use std::collections::BTreeSet;

use tokio::sync::Mutex;

#[derive(Debug)]
struct Pool {
    free: BTreeSet<u32>,
    capacity: u32,
}

#[derive(Debug)]
pub struct StreamIdAllocator {
    pool: Mutex<Pool>,
}

impl StreamIdAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            pool: Mutex::new(Pool {
                free: (1..=capacity).collect(),
                capacity,
            }),
        }
    }

    /// Take the lowest free id, `None` when the space is exhausted
    pub async fn take(&self) -> Option<u32> {
        let mut pool = self.pool.lock().await;
        let id = pool.free.pop_first();
        if id.is_none() {
            tracing::warn!(capacity = pool.capacity, "Stream id space exhausted");
        }
        id
    }

    /// Return an id to the pool; unknown or already-free ids are ignored
    pub async fn restore(&self, id: u32) {
        let mut pool = self.pool.lock().await;
        if id == 0 || id > pool.capacity {
            tracing::warn!(stream_id = id, "Ignoring restore of id outside the pool");
            return;
        }
        if !pool.free.insert(id) {
            tracing::debug!(stream_id = id, "Stream id already free");
        }
    }

    pub async fn available(&self) -> usize {
        self.pool.lock().await.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_take_restore_exhaust() {
        let alloc = StreamIdAllocator::new(2);
        assert_eq!(alloc.take().await, Some(1));
        assert_eq!(alloc.take().await, Some(2));
        assert_eq!(alloc.take().await, None);

        alloc.restore(1).await;
        alloc.restore(1).await;
        assert_eq!(alloc.available().await, 1);
        assert_eq!(alloc.take().await, Some(1));

        alloc.restore(99).await;
        assert_eq!(alloc.available().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_takes_are_unique() {
        let alloc = Arc::new(StreamIdAllocator::new(64));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let alloc = Arc::clone(&alloc);
            handles.push(tokio::spawn(async move { alloc.take().await }));
        }
        let mut ids = BTreeSet::new();
        for h in handles {
            assert!(ids.insert(h.await.unwrap().unwrap()));
        }
        assert_eq!(ids.len(), 64);
        assert_eq!(alloc.take().await, None);
    }
}
