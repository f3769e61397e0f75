//! Bounded pool for short-lived responder tasks

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Runs history and object responders with a fixed concurrency ceiling
///
/// A request arriving while every slot is busy is dropped rather than
/// queued; the requester's own timeout covers it. Every task stops when the
/// session token is cancelled.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    token: CancellationToken,
}

impl WorkerPool {
    pub fn new(max_workers: usize, token: CancellationToken) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            token,
        }
    }

    /// Spawn `task` if a slot is free. Returns `false` when it was dropped.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!("Worker pool exhausted, dropping {} task", name);
                return false;
            }
        };

        let token = self.token.clone();
        tokio::spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("{} task cancelled", name);
                }
                _ = task => {}
            }
        });
        true
    }

    /// Free slots
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_excess_tasks_are_dropped() {
        let pool = WorkerPool::new(1, CancellationToken::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        assert!(pool.spawn("blocker", async move {
            let _ = release_rx.await;
        }));
        assert!(!pool.spawn("overflow", async {}));

        release_tx.send(()).unwrap();
        for _ in 0..100 {
            if pool.available() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(pool.available(), 1);
        assert!(pool.spawn("after", async {}));
    }

    #[tokio::test]
    async fn test_cancellation_frees_slots() {
        let token = CancellationToken::new();
        let pool = WorkerPool::new(2, token.clone());
        pool.spawn("forever", std::future::pending::<()>());
        pool.spawn("forever", std::future::pending::<()>());
        assert_eq!(pool.available(), 0);

        token.cancel();
        for _ in 0..100 {
            if pool.available() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(pool.available(), 2);
    }
}
