//! Explicit scheduling handle.
//!
//! I/O-bound work (notifier pumps, directory walks, file reads) runs on a tokio
//! runtime; CPU-bound search shards run on a dedicated rayon pool. Both are
//! owned by a [`WorkerPool`] that is handed to the registry and the search
//! engine instead of relying on process-wide defaults.

use std::future::Future;
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::IndexerResult;

#[derive(Clone)]
pub struct WorkerPool {
    runtime: Handle,
    compute: Arc<ThreadPool>,
}

impl WorkerPool {
    /// Build a pool on `runtime` with `threads` search workers (0 = one per CPU).
    pub fn new(runtime: Handle, threads: usize) -> IndexerResult<Self> {
        let threads = if threads == 0 { num_cpus::get() } else { threads };
        let compute = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tokindex-search-{i}"))
            .build()?;
        Ok(Self {
            runtime,
            compute: Arc::new(compute),
        })
    }

    /// Build a pool bound to the runtime the caller is running on.
    pub fn current(threads: usize) -> IndexerResult<Self> {
        Self::new(Handle::try_current()?, threads)
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Number of concurrent search workers.
    pub fn parallelism(&self) -> usize {
        self.compute.current_num_threads()
    }

    /// Run `op` inside the search pool, blocking the caller until it returns.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.compute.install(op)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("parallelism", &self.parallelism())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_parallelism() {
        let pool = WorkerPool::current(3).unwrap();
        assert_eq!(pool.parallelism(), 3);
        let sum: i32 = pool.install(|| (1..=4).sum());
        assert_eq!(sum, 10);
    }

    #[tokio::test]
    async fn test_zero_means_available_parallelism() {
        let pool = WorkerPool::current(0).unwrap();
        assert_eq!(pool.parallelism(), num_cpus::get());
    }

    #[test]
    fn test_current_requires_runtime() {
        let err = WorkerPool::current(1).unwrap_err();
        assert!(matches!(err, crate::IndexerError::NoRuntime(_)));
    }

    #[tokio::test]
    async fn test_spawn_runs_on_runtime() {
        let pool = WorkerPool::current(1).unwrap();
        let value = pool.spawn(async { 21 * 2 }).await.unwrap();
        assert_eq!(value, 42);
    }
}
