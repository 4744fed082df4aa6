//! Single-flight execution for keyed in-flight operations.
//!
//! Wraps the `async_singleflight` crate so that only one operation runs
//! per key while concurrent callers share its result. The coordinator
//! keys launches by room id: all callers racing to provision the same
//! room wait on one provider call, and the entry clears itself on
//! completion or failure.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Error type for single-flight operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SingleFlightError<E> {
    /// The worker task panicked or was cancelled
    #[error("Single-flight worker failed - leader dropped or panicked")]
    WorkerFailed,
    /// The underlying operation failed
    #[error("{0}")]
    Inner(E),
}

/// Prevents duplicate concurrent executions per key.
///
/// When multiple tasks attempt the same keyed operation simultaneously,
/// only one execution proceeds while the others wait for its result.
#[derive(Clone)]
pub struct SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    group: Arc<async_singleflight::Group<K, V, E>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            group: Arc::new(async_singleflight::Group::new()),
        }
    }

    /// Execute a function only once for a given key
    ///
    /// If another call for the same key is in progress, this waits for
    /// that result instead of executing the function again.
    pub async fn do_work<Fut>(&self, key: K, f: Fut) -> Result<V, SingleFlightError<E>>
    where
        Fut: std::future::Future<Output = Result<V, E>> + Send,
    {
        // Group::work returns Result<V, Option<E>>:
        //   Ok(v)        => success
        //   Err(Some(e)) => inner error from the function
        //   Err(None)    => leader failed/dropped (after retry attempts)
        self.group
            .work(&key, f)
            .await
            .map_err(|opt_err| match opt_err {
                Some(inner) => SingleFlightError::Inner(inner),
                None => SingleFlightError::WorkerFailed,
            })
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn test_single_request() {
        let sf: SingleFlight<String, i32, String> = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        let counter_clone = counter.clone();
        let result = sf
            .do_work("key1".to_string(), async move {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deduplicates_concurrent_requests() {
        let sf: SingleFlight<String, i32, String> = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..10 {
            let sf = sf.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                sf.do_work("same_key".to_string(), async move {
                    sleep(Duration::from_millis(50)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(123)
                })
                .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result, 123);
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let sf: SingleFlight<String, i32, String> = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        let sf1 = sf.clone();
        let c1 = counter.clone();
        let h1 = tokio::spawn(async move {
            sf1.do_work("key1".to_string(), async move {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
        });

        let sf2 = sf.clone();
        let c2 = counter.clone();
        let h2 = tokio::spawn(async move {
            sf2.do_work("key2".to_string(), async move {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await
        });

        assert_eq!(h1.await.unwrap().unwrap(), 1);
        assert_eq!(h2.await.unwrap().unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_entry_cleared_after_error() {
        let sf: SingleFlight<String, i32, String> = SingleFlight::new();

        let result = sf
            .do_work("fail_key".to_string(), async {
                Err("intentional error".to_string())
            })
            .await;
        assert!(matches!(result, Err(SingleFlightError::Inner(_))));

        // Same key works again once the failed entry is gone.
        let result = sf.do_work("fail_key".to_string(), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
