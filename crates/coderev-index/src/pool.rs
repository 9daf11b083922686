//! Bounded pool for blocking work.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{IndexError, Result};

/// Runs closures on tokio's blocking threads, at most `permits` at a time.
/// Cloning shares the same bound.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl BlockingPool {
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// # Errors
    ///
    /// Returns [`IndexError::Worker`] if the task panics, or
    /// [`IndexError::Other`] if the pool has been closed.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| IndexError::Other(format!("blocking pool closed: {e}")))?;
        let out = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await?;
        Ok(out)
    }
}

impl Default for BlockingPool {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn runs_closure() {
        let pool = BlockingPool::new(2);
        assert_eq!(pool.run(|| 21 * 2).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn zero_size_is_clamped() {
        assert_eq!(BlockingPool::new(0).size(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded() {
        let pool = BlockingPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    pool.run(move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panic_surfaces_as_worker_error() {
        let pool = BlockingPool::new(1);
        let err = pool.run(|| -> i32 { panic!("boom") }).await.unwrap_err();
        assert!(matches!(err, IndexError::Worker(_)));
        assert_eq!(pool.run(|| 1).await.unwrap(), 1);
    }
}
