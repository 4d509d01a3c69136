//! A bounded connection pool with an explicit `reset` escape hatch.
//!
//! Stages 3 and 4 run concurrent workers against the datastore; the pool
//! bounds how many connections they can hold at once. `acquire` blocks
//! (asynchronously) when the pool is exhausted and wakes when a connection
//! frees. `reset` discards every pooled connection — idle ones immediately,
//! checked-out ones when they are released — and lets them be lazily
//! recreated, which is the one-call recovery path the orchestrator takes
//! after a connectivity-class failure. A reset never regresses pipeline
//! stage state; it only affects connections.
//!
//! The pool is generic over the connection type and takes a factory
//! closure, so gateway implementations decide what a "connection" is
//! (a socket, a client handle, a session).

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Anything the orchestrator can reset. Implemented by
/// [`ConnectionPool`] for every connection type, so the pipeline can hold
/// an `Arc<dyn PoolControl>` without knowing what flows through the pool.
pub trait PoolControl: Send + Sync {
    /// Discard all pooled connections. Idle connections are dropped now;
    /// checked-out connections are dropped on release instead of being
    /// returned. New acquisitions create fresh connections lazily.
    fn reset(&self);

    /// Number of resets performed over the pool's lifetime.
    fn reset_count(&self) -> u64;
}

/// A bounded pool of lazily created connections.
pub struct ConnectionPool<C: Send + 'static> {
    factory: Box<dyn Fn() -> C + Send + Sync>,
    idle: Mutex<Vec<C>>,
    /// Bumped on every reset; a connection checked out under an older epoch
    /// is stale and is dropped on release.
    epoch: AtomicU64,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl<C: Send + 'static> ConnectionPool<C> {
    /// Create a pool of at most `capacity` concurrent connections.
    /// Connections are created on demand by `factory`, never eagerly.
    pub fn new(capacity: usize, factory: impl Fn() -> C + Send + Sync + 'static) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            factory: Box::new(factory),
            idle: Mutex::new(Vec::with_capacity(capacity)),
            epoch: AtomicU64::new(0),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle connections currently held.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("pool idle lock").len()
    }

    /// Check out a connection, waiting if the pool is exhausted.
    pub async fn acquire(self: &Arc<Self>) -> PooledConn<C> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");

        let epoch = self.epoch.load(Ordering::Acquire);
        let conn = {
            let mut idle = self.idle.lock().expect("pool idle lock");
            idle.pop()
        };
        let conn = conn.unwrap_or_else(|| {
            debug!("pool: creating fresh connection");
            (self.factory)()
        });

        PooledConn {
            conn: Some(conn),
            epoch,
            pool: Arc::clone(self),
            _permit: permit,
        }
    }
}

impl<C: Send + 'static> PoolControl for ConnectionPool<C> {
    fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let discarded = {
            let mut idle = self.idle.lock().expect("pool idle lock");
            std::mem::take(&mut *idle)
        };
        debug!(
            "pool: reset, discarded {} idle connection(s)",
            discarded.len()
        );
    }

    fn reset_count(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

/// A checked-out connection. Dereferences to `C`; returns itself to the
/// pool on drop unless a reset happened while it was out.
pub struct PooledConn<C: Send + 'static> {
    conn: Option<C>,
    epoch: u64,
    pool: Arc<ConnectionPool<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Send + 'static> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl<C: Send + 'static> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl<C: Send + 'static> Drop for PooledConn<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let current = self.pool.epoch.load(Ordering::Acquire);
            if current == self.epoch {
                let mut idle = self.pool.idle.lock().expect("pool idle lock");
                idle.push(conn);
            } else {
                // Checked out before a reset: stale, drop instead of return.
                debug!("pool: dropping stale connection from epoch {}", self.epoch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_pool(capacity: usize) -> (Arc<ConnectionPool<usize>>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let created_in_factory = Arc::clone(&created);
        let pool = ConnectionPool::new(capacity, move || {
            created_in_factory.fetch_add(1, Ordering::SeqCst)
        });
        (pool, created)
    }

    #[tokio::test]
    async fn connections_are_reused_after_release() {
        let (pool, created) = counting_pool(2);

        {
            let _a = pool.acquire().await;
        }
        {
            let _b = pool.acquire().await;
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_blocks_until_release() {
        let (pool, _created) = counting_pool(1);

        let held = pool.acquire().await;
        let pool_for_waiter = Arc::clone(&pool);
        let waiter = tokio::spawn(async move {
            let _conn = pool_for_waiter.acquire().await;
        });

        // The waiter cannot proceed while the only permit is held.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish once the connection frees")
            .unwrap();
    }

    #[tokio::test]
    async fn reset_discards_idle_and_outstanding_connections() {
        let (pool, created) = counting_pool(2);

        let outstanding = pool.acquire().await;
        {
            let _second = pool.acquire().await;
        }
        assert_eq!(pool.idle_count(), 1);

        pool.reset();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.reset_count(), 1);

        // Released after the reset: dropped, not returned.
        drop(outstanding);
        assert_eq!(pool.idle_count(), 0);

        // Next acquire creates a fresh connection.
        let before = created.load(Ordering::SeqCst);
        let _fresh = pool.acquire().await;
        assert_eq!(created.load(Ordering::SeqCst), before + 1);
    }
}
