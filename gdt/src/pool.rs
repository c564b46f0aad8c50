//! Generic bounded pool (C4). The original implementation pre-allocates
//! fixed-size arrays of message/parameter/stream chunks at startup
//! (`--gdt-smsg-pool`, `--gdt-sparam-pool`) and refuses new work rather
//! than growing once they're exhausted, so backpressure shows up as a
//! stat increment instead of unbounded memory growth. `Pool<T>` keeps
//! that non-blocking, fixed-capacity contract but lets `T` be anything
//! (a `Payload` buffer, a `Stream` slot, a `ServiceMessage` slot) instead
//! of one pool implementation per chunk kind.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::stats::{StatId, Stats};

struct Inner<T> {
    free: Vec<T>,
    capacity: usize,
}

/// A fixed-capacity object pool. `checkout` never blocks: it either
/// returns a `Lease<T>` immediately or fails with
/// `Error::PoolExhausted`, incrementing `on_empty` so callers can see the
/// backpressure in `Body::Stats`.
pub struct Pool<T> {
    name: &'static str,
    on_empty: StatId,
    stats: Arc<Stats>,
    inner: Mutex<Inner<T>>,
}

impl<T> Pool<T> {
    /// Builds a pool pre-filled with `capacity` items produced by `make`,
    /// matching the original's eager pre-allocation at startup.
    pub fn new(
        name: &'static str,
        capacity: usize,
        on_empty: StatId,
        stats: Arc<Stats>,
        make: impl Fn() -> T,
    ) -> Self {
        let free = (0..capacity).map(|_| make()).collect();
        Pool {
            name,
            on_empty,
            stats,
            inner: Mutex::new(Inner { free, capacity }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Checks out one item, or fails immediately (never blocks) if the
    /// pool is empty.
    pub fn checkout(self: &Arc<Self>) -> Result<Lease<T>> {
        let mut inner = self.inner.lock();
        match inner.free.pop() {
            Some(item) => Ok(Lease {
                pool: self.clone(),
                item: Some(item),
            }),
            None => {
                self.stats.incr(self.on_empty);
                Err(Error::PoolExhausted {
                    pool: self.name,
                    capacity: inner.capacity,
                })
            }
        }
    }

    fn release(&self, item: T) {
        self.inner.lock().free.push(item);
    }
}

/// A checked-out pool entry. Returns the item to its pool on drop, so
/// callers never need to remember to give it back explicitly.
pub struct Lease<T> {
    pool: Arc<Pool<T>>,
    item: Option<T>,
}

impl<T> std::ops::Deref for Lease<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.item.as_ref().expect("item taken only by Drop")
    }
}

impl<T> std::ops::DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("item taken only by Drop")
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

#[cfg(test)]
mod pool_test {
    use super::*;

    #[test]
    fn checkout_and_drop_returns_capacity() {
        let stats = Arc::new(Stats::new());
        let pool = Arc::new(Pool::new(
            "test",
            2,
            StatId::RxSmsgPoolEmpty,
            stats.clone(),
            || Vec::<u8>::new(),
        ));
        assert_eq!(pool.available(), 2);
        let lease = pool.checkout().unwrap();
        assert_eq!(pool.available(), 1);
        drop(lease);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn exhaustion_increments_stat_and_errors() {
        let stats = Arc::new(Stats::new());
        let pool = Arc::new(Pool::new(
            "test",
            1,
            StatId::RxSmsgPoolEmpty,
            stats.clone(),
            || 0u32,
        ));
        let _lease = pool.checkout().unwrap();
        let err = pool.checkout().unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { .. }));
        assert_eq!(stats.get(StatId::RxSmsgPoolEmpty), 1);
    }
}
