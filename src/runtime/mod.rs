//! Concurrency and resilience utilities.
//!
//! The retry combinator classifies failures through [`crate::ErrorKind`]
//! and re-attempts only transient ones with jittered exponential backoff.
//! Single-flight deduplicates concurrent work per key (content-hash
//! ingestion, session title generation). The call pool bounds concurrent
//! model calls and rejects with `ResourceExhausted` instead of queueing
//! without limit.

use crate::error::{Error, Result};
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied per retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Creates a config with `max_attempts` total attempts.
    #[must_use]
    pub fn with_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Backoff delay before the given retry (1-based), jittered to
    /// between 50% and 100% of the exponential value.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(i32::try_from(attempt - 1).unwrap_or(i32::MAX));
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let jitter = rand::rng().random_range(0.5..=1.0);
        Duration::from_millis((capped * jitter) as u64)
    }
}

/// Runs `op` with retries on transient failures.
///
/// Non-retryable errors surface immediately; retryable errors are
/// re-attempted up to `config.max_attempts` with jittered backoff.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted.
pub async fn retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Deduplicates concurrent executions per key: the first caller runs the
/// work, later callers with the same key await and share its result.
///
/// `V` must be `Clone`; wrap errors in a clonable form before sharing.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, watch::Receiver<Option<V>>>>,
}

/// Outcome of trying to join an in-flight execution or become its leader.
enum JoinOutcome<V> {
    /// Caller is (or must become) the leader; `None` means the lock was
    /// poisoned and deduplication is skipped for this call.
    Lead(Option<watch::Sender<Option<V>>>),
    /// Caller should wait on an existing leader's receiver.
    Follow(watch::Receiver<Option<V>>),
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty single-flight group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Either becomes the leader for `key` (by inserting a fresh channel) or
    /// finds an existing leader's receiver. Kept as a plain, non-async
    /// function so the `MutexGuard` never crosses an `.await` point.
    fn join_or_lead(&self, key: &K) -> JoinOutcome<V> {
        let Ok(mut map) = self.inflight.lock() else {
            // Poisoned lock: run without deduplication.
            return JoinOutcome::Lead(None);
        };
        if let Some(rx) = map.get(key) {
            JoinOutcome::Follow(rx.clone())
        } else {
            let (tx, rx) = watch::channel(None);
            map.insert(key.clone(), rx);
            JoinOutcome::Lead(Some(tx))
        }
    }

    /// Runs `work` for `key`, or waits for the in-flight execution.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let mut work = Some(work);
        loop {
            match self.join_or_lead(&key) {
                JoinOutcome::Lead(tx) => {
                    let work = work.take().expect("work is consumed exactly once");
                    let value = work().await;
                    if let Some(tx) = tx {
                        let _ = tx.send(Some(value.clone()));
                        if let Ok(mut map) = self.inflight.lock() {
                            map.remove(&key);
                        }
                    }
                    return value;
                }
                JoinOutcome::Follow(mut rx) => {
                    loop {
                        if let Some(value) = rx.borrow().clone() {
                            return value;
                        }
                        if rx.changed().await.is_err() {
                            // Leader vanished without publishing; take over.
                            break;
                        }
                    }
                    // Extremely rare: re-enter as a fresh leader.
                }
            }
        }
    }

    /// Number of keys currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inflight.lock().map_or(0, |map| map.len())
    }

    /// Whether no work is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded pool for external model calls.
///
/// At most `concurrency` calls run at once; at most `queue_capacity`
/// callers wait. Beyond that, acquisition fails with
/// [`Error::ResourceExhausted`] instead of growing the queue.
pub struct CallPool {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    queue_capacity: usize,
}

impl CallPool {
    /// Creates a pool with the given concurrency and wait-queue bound.
    #[must_use]
    pub fn new(name: &'static str, concurrency: usize, queue_capacity: usize) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            waiting: AtomicUsize::new(0),
            queue_capacity,
        }
    }

    /// Acquires a slot, waiting in the bounded queue if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`] when the wait queue is full.
    pub async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(permit);
        }

        let waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        if waiting >= self.queue_capacity {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::ResourceExhausted {
                resource: self.name.to_string(),
            });
        }

        let permit = Arc::clone(&self.semaphore).acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        permit.map_err(|_| Error::ResourceExhausted {
            resource: self.name.to_string(),
        })
    }
}

/// Runs a future under a deadline.
///
/// # Errors
///
/// Returns [`Error::DeadlineExceeded`] when the deadline elapses first.
pub async fn with_deadline<T, Fut>(deadline: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::DeadlineExceeded {
            seconds: deadline.as_secs(),
        }),
    }
}

/// Returns `Err(Cancelled)` when the token has been cancelled.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] when cancellation was requested.
pub fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
