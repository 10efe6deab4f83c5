//! Connection pool with retry-with-backoff
//!
//! Workers each check out one connection and keep it for their whole
//! lifetime. When every connection is checked out, `acquire` does not fail
//! straight away: it backs off exponentially (100ms, 200ms, 400ms, ...)
//! and tries again, only giving up once the retry budget is spent.

use crate::error::{ServiceError, SourceError, SourceResult};
use crate::source::ConnectionFactory;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Errors that may succeed when retried
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for SourceError {
    fn is_transient(&self) -> bool {
        SourceError::is_transient(self)
    }
}

impl Retryable for ServiceError {
    fn is_transient(&self) -> bool {
        ServiceError::is_transient(self)
    }
}

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Override the base delay (tests use tiny delays)
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying transient failures
    pub fn run<T, E: Retryable>(&self, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Transient error, backing off");
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Bounded pool of record source connections
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    idle: Mutex<Vec<F::Connection>>,
    created: AtomicUsize,
    max_connections: usize,
    retry: RetryPolicy,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, max_connections: usize, retry: RetryPolicy) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::with_capacity(max_connections)),
            created: AtomicUsize::new(0),
            max_connections: max_connections.max(1),
            retry,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Connections opened and not closed
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Connections sitting idle in the pool
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// The pool's retry policy, shared with query-level retries
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn describe(&self) -> String {
        self.factory.describe()
    }

    /// Check out a connection, backing off while the pool is exhausted
    pub fn acquire(self: &Arc<Self>) -> SourceResult<PooledConnection<F>> {
        let mut last_error = None;

        for attempt in 0..=self.retry.retries {
            if attempt > 0 {
                let delay = self.retry.delay(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    created = self.created(),
                    max = self.max_connections,
                    "Pool exhausted, backing off"
                );
                std::thread::sleep(delay);
            }

            if let Some(conn) = self.idle.lock().pop() {
                return Ok(PooledConnection::new(conn, Arc::clone(self)));
            }

            let reserved = self
                .created
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < self.max_connections).then_some(n + 1)
                })
                .is_ok();
            if !reserved {
                continue;
            }

            match self.factory.connect() {
                Ok(conn) => {
                    debug!(created = self.created(), "Opened new connection");
                    return Ok(PooledConnection::new(conn, Arc::clone(self)));
                }
                Err(e) => {
                    self.created.fetch_sub(1, Ordering::SeqCst);
                    if !e.is_transient() {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(SourceError::PoolExhausted {
            attempts: self.retry.retries + 1,
            max: self.max_connections,
        }))
    }

    fn release(&self, conn: F::Connection) {
        self.idle.lock().push(conn);
    }
}

/// A checked-out connection; returns to the pool on drop
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    pool: Arc<ConnectionPool<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    fn new(conn: F::Connection, pool: Arc<ConnectionPool<F>>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("Connection already returned")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("Connection already returned")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryFactory, MemoryStore};
    use std::sync::atomic::AtomicU32;

    fn fast(retries: u32) -> RetryPolicy {
        RetryPolicy::new(retries).with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_connection_reused() {
        let pool = Arc::new(ConnectionPool::new(MemoryFactory::new(MemoryStore::new()), 2, fast(0)));
        {
            let _a = pool.acquire().unwrap();
            assert_eq!(pool.created(), 1);
        }
        assert_eq!(pool.idle(), 1);
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.created(), 1);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_exhaustion_backs_off_then_fails() {
        let pool = Arc::new(ConnectionPool::new(MemoryFactory::new(MemoryStore::new()), 1, fast(3)));
        let _held = pool.acquire().unwrap();
        match pool.acquire() {
            Err(SourceError::PoolExhausted { attempts, max }) => {
                assert_eq!(attempts, 4);
                assert_eq!(max, 1);
            }
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("pool should be exhausted"),
        }
    }

    #[test]
    fn test_exhaustion_recovers_when_released() {
        let pool = Arc::new(ConnectionPool::new(
            MemoryFactory::new(MemoryStore::new()),
            1,
            RetryPolicy::new(6).with_base_delay(Duration::from_millis(20)),
        ));
        let held = pool.acquire().unwrap();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            drop(held);
        });
        assert!(pool.acquire().is_ok());
        releaser.join().unwrap();
    }

    #[test]
    fn test_run_retries_transient_only() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, SourceError> = fast(3).run(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(SourceError::Busy("locked".into()))
            } else {
                Ok(n)
            }
        });
        assert_eq!(result.unwrap(), 2);

        calls.store(0, Ordering::SeqCst);
        let result: Result<(), SourceError> = fast(3).run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::InvalidIdentifier("x y".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
