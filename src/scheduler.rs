//! Cron scheduling of sync and retention jobs.
//!
//! Every registered task is singleton: a firing that arrives while the
//! previous run of the same task is still busy is skipped, not queued.
//! Distinct tasks never wait on each other. Task bodies are blocking and run
//! on tokio's blocking pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::error::SchedulerError;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// A unit of periodic work.
pub trait ScheduledTask: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> String;
    fn run(&self);
}

/// Held for as long as one run of a task is in flight.
pub struct SingletonGuard {
    running: Arc<AtomicBool>,
}

impl SingletonGuard {
    pub fn try_acquire(running: &Arc<AtomicBool>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running: Arc::clone(running) })
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireOutcome {
    Ran,
    Skipped,
    Panicked,
}

/// One firing of `task`: skip when it is still busy, otherwise run it to
/// completion on the blocking pool.
pub async fn fire(task: Arc<dyn ScheduledTask>, running: Arc<AtomicBool>) -> FireOutcome {
    let name = task.name();
    let Some(guard) = SingletonGuard::try_acquire(&running) else {
        debug!("{} is still running, skipping this firing", name);
        return FireOutcome::Skipped;
    };
    let handle = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        task.run();
    });
    match handle.await {
        Ok(()) => FireOutcome::Ran,
        Err(e) => {
            error!("job {} failed: {}", name, e);
            FireOutcome::Panicked
        }
    }
}

/// Accept classic five-field cron by prefixing a zero seconds field.
pub fn normalize_cron(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

pub struct Scheduler {
    inner: JobScheduler,
    jobs: usize,
}

impl Scheduler {
    pub async fn new() -> SchedulerResult<Self> {
        let inner = JobScheduler::new().await.map_err(SchedulerError::CreationFailed)?;
        Ok(Self { inner, jobs: 0 })
    }

    /// Register `task` to fire on `cron` (UTC). A malformed expression is an
    /// error; nothing is registered in that case.
    pub async fn register(&mut self, cron: &str, task: Arc<dyn ScheduledTask>) -> SchedulerResult<()> {
        let cron = normalize_cron(cron);
        let name = task.name();
        let running = Arc::new(AtomicBool::new(false));

        let job = Job::new_async(cron.as_str(), move |_id, _lock| {
            let task = Arc::clone(&task);
            let running = Arc::clone(&running);
            Box::pin(async move {
                fire(task, running).await;
            })
        })
        .map_err(|source| SchedulerError::JobRegistrationFailed {
            job: name.clone(),
            cron: cron.clone(),
            source,
        })?;

        let job_id = job.guid();
        self.inner.add(job).await.map_err(|source| SchedulerError::JobRegistrationFailed {
            job: name.clone(),
            cron: cron.clone(),
            source,
        })?;
        self.jobs += 1;
        debug!(cron = %cron, job_id = %job_id, "registered job {}", name);
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.jobs
    }

    pub async fn start(&self) -> SchedulerResult<()> {
        self.inner.start().await.map_err(SchedulerError::StartFailed)?;
        info!("scheduler started with {} jobs", self.jobs);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> SchedulerResult<()> {
        self.inner.shutdown().await.map_err(SchedulerError::StopFailed)?;
        info!("scheduler stopped");
        Ok(())
    }
}
