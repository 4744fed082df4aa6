//! Worker pool management
//!
//! A fixed pool of media workers created at startup, sized to host
//! capacity. Each router checkout picks the worker with the lowest load
//! counter (ties broken by pool order) and increments it; releasing the
//! room's router decrements it. Workers live for the whole process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::{EngineWorker, MediaEngine};
use crate::error::{MediaError, MediaResult};

struct PooledWorker {
    worker: Arc<dyn EngineWorker>,
    load: AtomicUsize,
}

/// Bounded pool of media workers with greedy load balancing.
pub struct WorkerPool {
    workers: Vec<PooledWorker>,
}

impl WorkerPool {
    /// Create `size` workers up front.
    pub async fn initialize(engine: &dyn MediaEngine, size: usize) -> MediaResult<Self> {
        if size == 0 {
            return Err(MediaError::Worker(
                "Worker pool size must be at least 1".to_string(),
            ));
        }

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let worker = engine.create_worker(index).await?;
            info!(
                worker_id = %worker.id(),
                index,
                total = size,
                "Media worker initialized"
            );
            workers.push(PooledWorker {
                worker,
                load: AtomicUsize::new(0),
            });
        }

        Ok(Self { workers })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Pick the least-loaded worker (ties by pool order) and charge one
    /// router to it. Returns the worker and its pool index for the later
    /// [`release`](Self::release).
    pub fn checkout(&self) -> MediaResult<(Arc<dyn EngineWorker>, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (index, pooled) in self.workers.iter().enumerate() {
            let load = pooled.load.load(Ordering::Relaxed);
            if best.map_or(true, |(_, best_load)| load < best_load) {
                best = Some((index, load));
            }
        }

        let (index, load) = best.ok_or_else(|| MediaError::Worker("No workers available".to_string()))?;
        self.workers[index].load.fetch_add(1, Ordering::Relaxed);
        debug!(
            worker_id = %self.workers[index].worker.id(),
            index,
            load = load + 1,
            "Selected worker for new router"
        );
        Ok((Arc::clone(&self.workers[index].worker), index))
    }

    /// Give back one router's worth of load (called when a room's router is
    /// released).
    pub fn release(&self, index: usize) {
        if let Some(pooled) = self.workers.get(index) {
            let previous = pooled.load.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |load| {
                Some(load.saturating_sub(1))
            });
            debug!(
                worker_id = %pooled.worker.id(),
                index,
                load = previous.unwrap_or(0).saturating_sub(1),
                "Released worker load"
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn load_of(&self, index: usize) -> usize {
        self.workers[index].load.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;

    #[tokio::test]
    async fn test_zero_size_pool_rejected() {
        let engine = MockEngine::new();
        assert!(WorkerPool::initialize(&engine, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_least_loaded_selection_with_ties_by_order() {
        let engine = MockEngine::new();
        let pool = WorkerPool::initialize(&engine, 3).await.unwrap();

        // All loads equal: pool order wins.
        let (first, first_index) = pool.checkout().unwrap();
        assert_eq!(first_index, 0);
        assert_eq!(first.id(), "mock-worker-0");

        // Now worker 0 carries load 1, so worker 1 is next.
        let (_, second_index) = pool.checkout().unwrap();
        assert_eq!(second_index, 1);
        let (_, third_index) = pool.checkout().unwrap();
        assert_eq!(third_index, 2);

        // Back to even loads: order breaks the tie again.
        let (_, fourth_index) = pool.checkout().unwrap();
        assert_eq!(fourth_index, 0);
    }

    #[tokio::test]
    async fn test_release_returns_capacity() {
        let engine = MockEngine::new();
        let pool = WorkerPool::initialize(&engine, 2).await.unwrap();

        let (_, a) = pool.checkout().unwrap();
        let (_, b) = pool.checkout().unwrap();
        assert_eq!((a, b), (0, 1));

        pool.release(0);
        assert_eq!(pool.load_of(0), 0);

        let (_, next) = pool.checkout().unwrap();
        assert_eq!(next, 0);

        // Releasing an idle worker never underflows.
        pool.release(1);
        pool.release(1);
        assert_eq!(pool.load_of(1), 0);
    }
}
