//! Bounded worker pool
//!
//! A fixed set of worker threads fed through a crossbeam channel. Admission
//! is counted: `submit` blocks while `workers` tasks are in flight, so the
//! channel never holds more tasks than there are idle workers to take them.
//! `wait_all` is the drain barrier used between source trees.

use crate::error::{FanCopyError, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Anything tasks can be handed to
pub trait TaskSink<T> {
    /// Hand over one task, blocking while the sink is saturated
    fn submit(&self, task: T) -> Result<()>;
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Configured worker count
    pub workers: usize,
    /// Tasks accepted by `submit`
    pub submitted: u64,
    /// Tasks whose handler returned `Ok`
    pub completed: u64,
    /// Tasks whose handler returned an error or panicked
    pub failed: u64,
    /// Tasks admitted and not yet finished
    pub in_flight: usize,
    /// Highest in-flight count observed
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct Admission {
    in_flight: usize,
    peak: usize,
}

#[derive(Debug, Default)]
struct PoolShared {
    admission: Mutex<Admission>,
    slot_freed: Condvar,
    drained: Condvar,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, Admission> {
        self.admission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a slot is free, then take it
    fn acquire(&self, limit: usize) {
        let mut admission = self.lock();
        while admission.in_flight >= limit {
            admission = self
                .slot_freed
                .wait(admission)
                .unwrap_or_else(PoisonError::into_inner);
        }
        admission.in_flight += 1;
        admission.peak = admission.peak.max(admission.in_flight);
    }

    fn release(&self) {
        let mut admission = self.lock();
        admission.in_flight -= 1;
        self.slot_freed.notify_one();
        if admission.in_flight == 0 {
            self.drained.notify_all();
        }
    }
}

/// Bounded-concurrency executor
pub struct WorkerPool<T: Send + fmt::Display + 'static> {
    name: String,
    workers: usize,
    sender: Option<Sender<T>>,
    handles: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
}

impl<T: Send + fmt::Display + 'static> WorkerPool<T> {
    /// Start `workers` threads running `handler` on every submitted task
    pub fn new<F>(name: &str, workers: usize, handler: F) -> Result<Self>
    where
        F: Fn(T) -> Result<()> + Send + Sync + 'static,
    {
        if workers == 0 {
            return Err(FanCopyError::ThreadPool(format!(
                "{} needs at least one worker",
                name
            )));
        }

        let (sender, receiver) = bounded::<T>(workers);
        let handler = Arc::new(handler);
        let shared = Arc::new(PoolShared::default());

        let mut pool = Self {
            name: name.to_string(),
            workers,
            sender: Some(sender),
            handles: Vec::with_capacity(workers),
            shared: Arc::clone(&shared),
        };

        for worker_id in 0..workers {
            let receiver = receiver.clone();
            let handler = Arc::clone(&handler);
            let shared = Arc::clone(&shared);

            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, worker_id))
                .spawn(move || worker_loop(worker_id, receiver, handler, shared))
                .map_err(|e| FanCopyError::ThreadPool(format!("failed to spawn worker: {}", e)))?;

            pool.handles.push(handle);
        }

        tracing::debug!("{} started with {} workers", name, workers);
        Ok(pool)
    }

    /// Configured worker count
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Block until every admitted task has finished
    pub fn wait_all(&self) {
        let mut admission = self.shared.lock();
        while admission.in_flight > 0 {
            admission = self
                .shared
                .drained
                .wait(admission)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        let admission = self.shared.lock();
        PoolStats {
            workers: self.workers,
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            in_flight: admission.in_flight,
            peak_in_flight: admission.peak,
        }
    }

    /// Stop accepting tasks, let the workers finish and join them
    pub fn shutdown(mut self) -> PoolStats {
        self.join();
        self.stats()
    }

    fn join(&mut self) {
        // closing the channel ends every worker loop once it is empty
        self.sender.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("{} worker exited abnormally", self.name);
            }
        }
    }
}

impl<T: Send + fmt::Display + 'static> TaskSink<T> for WorkerPool<T> {
    fn submit(&self, task: T) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| FanCopyError::ThreadPool(format!("{} is shut down", self.name)))?;

        self.shared.acquire(self.workers);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        if sender.send(task).is_err() {
            self.shared.release();
            return Err(FanCopyError::ThreadPool(format!(
                "{} has no running workers",
                self.name
            )));
        }
        Ok(())
    }
}

impl<T: Send + fmt::Display + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.join();
    }
}

fn worker_loop<T, F>(worker_id: usize, receiver: Receiver<T>, handler: Arc<F>, shared: Arc<PoolShared>)
where
    T: fmt::Display,
    F: Fn(T) -> Result<()>,
{
    for task in receiver.iter() {
        let label = task.to_string();

        match catch_unwind(AssertUnwindSafe(|| handler(task))) {
            Ok(Ok(())) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                tracing::warn!("{} failed: {}", label, e);
                shared.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                tracing::error!("{} panicked on worker {}", label, worker_id);
                shared.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        shared.release();
    }

    tracing::debug!("Worker {} shutting down", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_zero_workers_rejected() {
        assert!(WorkerPool::<u32>::new("test", 0, |_| Ok(())).is_err());
    }

    #[test]
    fn test_concurrency_never_exceeds_workers() {
        let running = Arc::new(AtomicUsize::new(0));
        let observed_max = Arc::new(AtomicUsize::new(0));

        let (r, m) = (Arc::clone(&running), Arc::clone(&observed_max));
        let pool = WorkerPool::new("bound", 3, move |_: u32| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        assert_eq!(pool.workers(), 3);
        for i in 0..60 {
            pool.submit(i).unwrap();
            assert!(pool.stats().in_flight <= pool.workers());
        }
        pool.wait_all();

        let stats = pool.shutdown();
        assert_eq!(stats.submitted, 60);
        assert_eq!(stats.completed, 60);
        assert!(stats.peak_in_flight <= 3);
        assert!(observed_max.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_wait_all_drains() {
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        let pool = WorkerPool::new("drain", 2, move |_: u32| {
            thread::sleep(Duration::from_millis(5));
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        for i in 0..10 {
            pool.submit(i).unwrap();
        }
        pool.wait_all();
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert_eq!(pool.stats().in_flight, 0);

        // the barrier is reusable
        pool.submit(10).unwrap();
        pool.wait_all();
        assert_eq!(done.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_wait_all_on_idle_pool_returns() {
        let pool = WorkerPool::new("idle", 1, |_: u32| Ok(())).unwrap();
        pool.wait_all();
        assert_eq!(pool.shutdown().submitted, 0);
    }

    #[test]
    fn test_failures_are_contained() {
        let pool = WorkerPool::new("fail", 2, |n: u32| {
            if n % 2 == 0 {
                Err(FanCopyError::InvalidPath(format!("task {}", n)))
            } else if n == 5 {
                panic!("task {} blew up", n)
            } else {
                Ok(())
            }
        })
        .unwrap();

        for i in 0..10 {
            pool.submit(i).unwrap();
        }
        pool.wait_all();

        let stats = pool.shutdown();
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.failed, 6);
        assert_eq!(stats.completed, 4);
        assert_eq!(stats.in_flight, 0);
    }
}
