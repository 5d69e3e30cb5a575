//! The loader seam and the background worker pool that drives it.
//!
//! Jobs go out over a crossbeam channel to a fixed set of worker threads; results
//! come back over a second channel and are only applied when the tick thread drains
//! them. With zero workers, jobs run inline on the submitting thread but their
//! completions still wait for the next drain.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use strata_common::PartitionId;

/// Error returned by a [`PartitionLoader`] when a partition cannot be made resident.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct PartitionLoadError {
    pub reason: String,
}

impl PartitionLoadError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Makes content partitions resident and releases them again.
///
/// Implemented by the host engine (scene loading). Called from worker threads.
pub trait PartitionLoader: Send + Sync + 'static {
    fn load(&self, partition: &PartitionId) -> Result<(), PartitionLoadError>;

    /// Release a resident partition. Failures are the loader's to log; the partition
    /// is considered gone afterwards.
    fn unload(&self, partition: &PartitionId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Job {
    Load(PartitionId),
    Unload(PartitionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Loaded {
        partition: PartitionId,
        result: Result<(), PartitionLoadError>,
    },
    Unloaded {
        partition: PartitionId,
    },
}

fn run_job(loader: &dyn PartitionLoader, job: Job) -> Completion {
    match job {
        Job::Load(partition) => {
            let result = catch_unwind(AssertUnwindSafe(|| loader.load(&partition)))
                .unwrap_or_else(|_| Err(PartitionLoadError::new("loader panicked")));
            Completion::Loaded { partition, result }
        }
        Job::Unload(partition) => {
            if catch_unwind(AssertUnwindSafe(|| loader.unload(&partition))).is_err() {
                tracing::warn!(%partition, "loader panicked while unloading partition");
            }
            Completion::Unloaded { partition }
        }
    }
}

/// Fixed pool of loader threads.
pub(crate) struct WorkerPool {
    loader: Arc<dyn PartitionLoader>,
    jobs: Option<Sender<Job>>,
    completions_tx: Sender<Completion>,
    completions: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(loader: Arc<dyn PartitionLoader>, threads: usize) -> std::io::Result<Self> {
        let (completions_tx, completions) = crossbeam_channel::unbounded();
        let mut pool = Self {
            loader,
            jobs: None,
            completions_tx,
            completions,
            workers: Vec::with_capacity(threads),
        };
        if threads == 0 {
            return Ok(pool);
        }

        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded::<Job>();
        for i in 0..threads {
            let rx = jobs_rx.clone();
            let tx = pool.completions_tx.clone();
            let loader = Arc::clone(&pool.loader);
            let handle = std::thread::Builder::new()
                .name(format!("strata-loader-{i}"))
                .spawn(move || {
                    for job in rx.iter() {
                        if tx.send(run_job(loader.as_ref(), job)).is_err() {
                            break;
                        }
                    }
                })?;
            pool.workers.push(handle);
        }
        pool.jobs = Some(jobs_tx);
        tracing::debug!(threads, "loader pool started");
        Ok(pool)
    }

    pub fn submit(&self, job: Job) {
        let job = match &self.jobs {
            Some(jobs) => match jobs.send(job) {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!("loader pool is gone, running job inline");
                    err.into_inner()
                }
            },
            None => job,
        };
        // The receiver lives in `self`, so this send cannot fail.
        let _ = self.completions_tx.send(run_job(self.loader.as_ref(), job));
    }

    pub fn try_completions(&self) -> Vec<Completion> {
        self.completions.try_iter().collect()
    }

    pub fn wait_completion(&self, timeout: Duration) -> Option<Completion> {
        self.completions.recv_timeout(timeout).ok()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the job channel ends every worker loop.
        self.jobs = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("loader thread panicked");
            }
        }
    }
}
