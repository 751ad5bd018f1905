//! Bounded worker pool for container engine calls.
//!
//! Each engine call runs on its own task while holding a semaphore permit,
//! so at most `capacity` engine calls are in flight and the caller's task is
//! never the one driving a slow engine request. Every call has a deadline.
//! Past it the call gives its permit back and, if still unfinished, keeps
//! running detached until the engine answers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::SandboxError;

#[derive(Debug, Clone)]
pub(crate) struct EnginePool {
    permits: Arc<Semaphore>,
    call_timeout: Duration,
}

impl EnginePool {
    /// Pool of `capacity` slots whose [`run`](Self::run) calls give up
    /// after `call_timeout`.
    pub fn new(capacity: usize, call_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            call_timeout,
        }
    }

    /// Spawn an engine call that holds a slot for at most `limit`, counting
    /// the wait for the slot. Awaiting the handle yields its result; dropping
    /// the handle does not cancel it.
    pub fn spawn<F, T>(&self, limit: Duration, call: F) -> JoinHandle<Result<T, SandboxError>>
    where
        F: Future<Output = Result<T, SandboxError>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let deadline = Instant::now() + limit;
            let permit = match tokio::time::timeout_at(deadline, permits.acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(e)) => return Err(SandboxError::engine_task_failed(e.to_string())),
                Err(_) => return Err(SandboxError::engine_timeout(limit)),
            };

            tokio::pin!(call);
            tokio::select! {
                result = &mut call => result,
                () = tokio::time::sleep_until(deadline) => {
                    drop(permit);
                    call.await
                }
            }
        })
    }

    /// Spawn an engine call and wait for it, up to the pool's call timeout.
    pub async fn run<F, T>(&self, call: F) -> Result<T, SandboxError>
    where
        F: Future<Output = Result<T, SandboxError>> + Send + 'static,
        T: Send + 'static,
    {
        let limit = self.call_timeout;
        match tokio::time::timeout(limit, self.spawn(limit, call)).await {
            Ok(joined) => flatten(joined),
            Err(_) => Err(SandboxError::engine_timeout(limit)),
        }
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

pub(crate) fn flatten<T>(
    joined: Result<Result<T, SandboxError>, tokio::task::JoinError>,
) -> Result<T, SandboxError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(SandboxError::engine_task_failed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LIMIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_run_returns_call_result() {
        let pool = EnginePool::new(2, LIMIT);
        let value = pool.run(async { Ok::<_, SandboxError>(42) }).await.unwrap();
        assert_eq!(value, 42);

        let err = pool
            .run(async { Err::<(), _>(SandboxError::container_not_found("x")) })
            .await
            .unwrap_err();
        assert!(err.is_container_not_found());
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let pool = EnginePool::new(2, LIMIT);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                pool.spawn(LIMIT, async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, SandboxError>(())
                })
            })
            .collect();

        for handle in handles {
            flatten(handle.await).unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_dropped_handle_keeps_running() {
        let pool = EnginePool::new(1, LIMIT);
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        drop(pool.spawn(LIMIT, async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            flag.store(1, Ordering::SeqCst);
            Ok::<_, SandboxError>(())
        }));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let pool = EnginePool::new(0, LIMIT);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_expired_call_releases_its_slot() {
        let pool = EnginePool::new(1, LIMIT);
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);
        let handle = pool.spawn(Duration::from_millis(50), async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            flag.store(1, Ordering::SeqCst);
            Ok::<_, SandboxError>(())
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(pool.available(), 1);
        let value = pool.run(async { Ok::<_, SandboxError>(7) }).await.unwrap();
        assert_eq!(value, 7);

        // The expired call still runs to completion
        flatten(handle.await).unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_call_timeout() {
        let pool = EnginePool::new(1, Duration::from_millis(100));
        let started = Instant::now();
        let err = pool
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, SandboxError>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_engine_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_slot_wait_counts_against_limit() {
        let pool = EnginePool::new(1, LIMIT);
        let _busy = pool.spawn(LIMIT, async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, SandboxError>(())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = pool.spawn(Duration::from_millis(100), async { Ok::<_, SandboxError>(()) });
        let err = flatten(queued.await).unwrap_err();
        assert!(err.is_engine_timeout());
    }
}
