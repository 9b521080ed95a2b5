//! Bounded-concurrency worker pools.
//!
//! `submit` waits for a free slot before spawning, so a producer that outruns
//! the workers is throttled. `join` waits until every spawned job has
//! finished and reports the first failure. After a failure the pool refuses
//! new work but lets jobs already running complete.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info};

use crate::error::AuditError;

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    concurrency: usize,
    log_every: u64,
    permits: Arc<Semaphore>,
    in_flight: watch::Sender<usize>,
    failed: AtomicBool,
    failure: Mutex<Option<AuditError>>,
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, concurrency: usize, log_every: u64) -> Self {
        let concurrency = concurrency.max(1);
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                concurrency,
                log_every,
                permits: Arc::new(Semaphore::new(concurrency)),
                in_flight,
                failed: AtomicBool::new(false),
                failure: Mutex::new(None),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn has_failed(&self) -> bool {
        self.inner.failed.load(Ordering::SeqCst)
    }

    /// Queue `job`, waiting while the pool is at capacity.
    ///
    /// Returns once the job has been spawned. Fails with `PoolAborted` if an
    /// earlier job in this pool failed.
    pub async fn submit<F>(&self, label: impl Into<String>, job: F) -> Result<(), AuditError>
    where
        F: Future<Output = Result<(), AuditError>> + Send + 'static,
    {
        self.check_open()?;
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| self.aborted())?;
        self.check_open()?;

        self.inner.in_flight.send_modify(|n| *n += 1);
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);

        let mut guard = JobGuard {
            inner: Arc::clone(&self.inner),
            label: label.into(),
            finished: false,
        };
        tokio::spawn(async move {
            let _permit = permit;
            let result = job.await;
            guard.finish(result);
        });
        Ok(())
    }

    /// Wait for every submitted job to finish.
    ///
    /// Returns the first job failure, if any. The failure is handed out once;
    /// the pool stays closed to new work afterwards.
    pub async fn join(&self) -> Result<(), AuditError> {
        let mut in_flight = self.inner.in_flight.subscribe();
        in_flight
            .wait_for(|n| *n == 0)
            .await
            .map_err(|_| self.aborted())?;

        debug!(
            pool = %self.inner.name,
            completed = self.completed(),
            "Pool drained"
        );

        match self.inner.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_open(&self) -> Result<(), AuditError> {
        if self.has_failed() {
            return Err(self.aborted());
        }
        Ok(())
    }

    fn aborted(&self) -> AuditError {
        AuditError::PoolAborted {
            pool: self.inner.name.clone(),
        }
    }
}

impl PoolInner {
    fn record_failure(&self, label: &str, err: AuditError) {
        self.failed.store(true, Ordering::SeqCst);

        let mut failure = self.failure.lock();
        if failure.is_none() {
            error!(pool = %self.name, job = %label, error = %err, "Job failed, aborting pool");
            *failure = Some(err);
        } else {
            debug!(pool = %self.name, job = %label, error = %err, "Job failed after pool abort");
        }
    }

    fn job_done(&self) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));

        if self.log_every > 0 && completed % self.log_every == 0 {
            info!(
                pool = %self.name,
                completed,
                submitted = self.submitted.load(Ordering::Relaxed),
                in_flight = *self.in_flight.borrow(),
                "Pool progress"
            );
        }
    }
}

/// Settles a job's bookkeeping even if the job panics.
struct JobGuard {
    inner: Arc<PoolInner>,
    label: String,
    finished: bool,
}

impl JobGuard {
    fn finish(&mut self, result: Result<(), AuditError>) {
        self.finished = true;
        if let Err(err) = result {
            self.inner.record_failure(&self.label, err);
        }
        self.inner.job_done();
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            self.inner.record_failure(
                &self.label,
                AuditError::JobPanicked {
                    pool: self.inner.name.clone(),
                    job: self.label.clone(),
                },
            );
        }
        self.inner.job_done();
    }
}
