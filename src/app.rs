use std::sync::Arc;

use crate::config::Config;
use crate::error::SchedulerError;
use crate::metrics::MetricsSink;
use crate::retention::RetentionTarget;
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::sync_job::{JobContext, SyncJob};
use crate::transfer::Transfer;

/// Wires the validated configuration into scheduled jobs.
pub struct App {
    config: Config,
    ctx: JobContext,
}

impl App {
    pub fn new(config: Config, transfer: Arc<dyn Transfer>, metrics: Arc<dyn MetricsSink>) -> Self {
        let ctx = JobContext::from_config(&config, transfer, metrics);
        Self { config, ctx }
    }

    /// One job per expanded pair, each owning a copy of its pair.
    pub fn sync_jobs(&self) -> Vec<Arc<SyncJob>> {
        self.config.pairs.iter().cloned().map(|pair| Arc::new(SyncJob::new(pair, &self.ctx))).collect()
    }

    pub fn retention_jobs(&self) -> Vec<Arc<RetentionTarget>> {
        self.config.retention.iter().cloned().map(Arc::new).collect()
    }

    /// Build a scheduler holding every sync and retention job. Any
    /// registration failure aborts the whole setup.
    pub async fn schedule(&self) -> Result<Scheduler, SchedulerError> {
        let mut scheduler = Scheduler::new().await?;
        for job in self.sync_jobs() {
            tracing::info!(
                "sync {} -> {} on '{}', exclude file {}",
                job.pair().source_template,
                job.pair().dest_dir,
                self.config.download_cron,
                job.pair().exclude_file_name
            );
            scheduler.register(&self.config.download_cron, job as Arc<dyn ScheduledTask>).await?;
        }
        for target in self.retention_jobs() {
            tracing::info!("retention of {} on '{}'", target.dir.display(), self.config.delete_cron);
            scheduler.register(&self.config.delete_cron, target as Arc<dyn ScheduledTask>).await?;
        }
        Ok(scheduler)
    }
}
