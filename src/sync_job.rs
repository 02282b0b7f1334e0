//! One sync cycle for one pair.
//!
//! A cycle pulls the previous exclude snapshot, pulls new payload into a
//! private temporary directory, moves it into the destination, expands
//! archives, recomputes the exclude list and pushes it back. No step failure
//! escapes the cycle; the outcome is logged and returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime};
use tracing::{info, warn};

use crate::archive::expand_archives;
use crate::config::{Config, SyncPair};
use crate::exclude::{ExcludeLimits, ExcludeStore, list_destination};
use crate::fsops::{dir_stats, stage_into};
use crate::metrics::{MetricsSink, PairLabels, report_attempt, report_dir_stats};
use crate::scheduler::ScheduledTask;
use crate::template::resolve_at;
use crate::transfer::{ExitCode, Transfer, TransferRequest, timed};
use crate::util::slashes_to_underscores;

/// Everything a sync job needs besides its pair.
#[derive(Clone)]
pub struct JobContext {
    pub state_dir: PathBuf,
    pub limits: ExcludeLimits,
    pub stand_name: String,
    pub pod_name: String,
    pub transfer: Arc<dyn Transfer>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl JobContext {
    pub fn from_config(
        config: &Config,
        transfer: Arc<dyn Transfer>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            state_dir: config.state_dir.clone(),
            limits: config.limits,
            stand_name: config.stand_name.clone(),
            pod_name: config.pod_name.clone(),
            transfer,
            metrics,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Payload landed and the exclude list was rebuilt; `push` is the exit
    /// code of sending it back.
    Completed { excluded: Vec<String>, push: ExitCode },
    /// The payload pull failed; nothing after it ran.
    PayloadFailed(ExitCode),
    /// A local step failed before or after the transfer.
    Aborted(String),
}

pub struct SyncJob {
    pair: SyncPair,
    store: ExcludeStore,
    state_dir: PathBuf,
    labels: PairLabels,
    transfer: Arc<dyn Transfer>,
    metrics: Arc<dyn MetricsSink>,
}

impl SyncJob {
    pub fn new(pair: SyncPair, ctx: &JobContext) -> Self {
        let store = ExcludeStore::new(pair.local_exclude_path(&ctx.state_dir), ctx.limits);
        let labels = PairLabels {
            path: pair.dest_dir.clone(),
            stand_name: ctx.stand_name.clone(),
            pod_name: ctx.pod_name.clone(),
        };
        Self {
            pair,
            store,
            state_dir: ctx.state_dir.clone(),
            labels,
            transfer: Arc::clone(&ctx.transfer),
            metrics: Arc::clone(&ctx.metrics),
        }
    }

    pub fn pair(&self) -> &SyncPair {
        &self.pair
    }

    pub fn local_exclude_path(&self) -> &Path {
        self.store.path()
    }

    /// Run one cycle with date tokens resolved against `now`.
    pub fn run_cycle(&self, now: NaiveDateTime) -> CycleOutcome {
        let source = resolve_at(&self.pair.source_template, now);
        self.fetch_exclude_snapshot();

        let tmp = match tempfile::Builder::new()
            .prefix(&slashes_to_underscores(&self.pair.dest_dir))
            .tempdir_in(&self.state_dir)
        {
            Ok(dir) => dir,
            Err(e) => {
                warn!("couldn't create temp dir in {}: {}", self.state_dir.display(), e);
                return CycleOutcome::Aborted(e.to_string());
            }
        };

        info!("start downloading from {} to {}", source, tmp.path().display());
        let outcome = self.cycle_in(&source, tmp.path());
        info!("stop downloading from {} to {}", source, tmp.path().display());

        let tmp_path = tmp.path().to_path_buf();
        if let Err(e) = tmp.close() {
            warn!("couldn't remove temp dir {}: {}", tmp_path.display(), e);
        }
        outcome
    }

    /// Pull the remote snapshot; on failure start this cycle from an empty one.
    fn fetch_exclude_snapshot(&self) {
        let request = TransferRequest::pull_exclude(&self.pair.remote_exclude_path, self.store.path());
        let attempt = timed(self.transfer.as_ref(), &request);
        if attempt.exit_code.is_success() {
            return;
        }
        warn!(
            "couldn't download exclude file {}, rsync exit code {}, starting from an empty one",
            self.pair.remote_exclude_path, attempt.exit_code
        );
        if let Err(e) = self.store.reset() {
            warn!("{}", e);
        }
    }

    fn cycle_in(&self, source: &str, tmp_dir: &Path) -> CycleOutcome {
        let dest = Path::new(&self.pair.dest_dir);

        let request = TransferRequest::pull_payload(source, tmp_dir, self.store.path());
        let attempt = timed(self.transfer.as_ref(), &request);
        report_attempt(self.metrics.as_ref(), &self.labels, &attempt);
        if !attempt.exit_code.is_success() {
            warn!("couldn't download files from {}, rsync exit code {}", source, attempt.exit_code);
            return CycleOutcome::PayloadFailed(attempt.exit_code);
        }

        let staged = stage_into(tmp_dir, dest);
        for (path, e) in &staged.failures {
            warn!("couldn't move {} into {}: {}", path.display(), dest.display(), e);
        }

        let archives = expand_archives(dest);
        if !archives.expanded.is_empty() {
            info!("expanded {} archives into {} files", archives.expanded.len(), archives.extracted.len());
        }
        if let Some(summary) = archives.failure_summary() {
            warn!("archive errors in {}: {}", dest.display(), summary);
        }
        report_dir_stats(self.metrics.as_ref(), &self.labels, &dir_stats(dest, SystemTime::now()));

        let previous = self.store.load().unwrap_or_else(|e| {
            warn!("{}, using an empty exclude list", e);
            Vec::new()
        });
        let mut current = list_destination(dest).unwrap_or_else(|e| {
            warn!("{}, using the previous exclude list only", e);
            Vec::new()
        });
        current.extend(staged.moved);

        let excluded = match self.store.update(previous, current) {
            Ok(list) => list,
            Err(e) => {
                warn!("{}", e);
                return CycleOutcome::Aborted(e.to_string());
            }
        };

        let request = TransferRequest::push_exclude(self.store.path(), &self.pair.remote_exclude_path);
        let attempt = timed(self.transfer.as_ref(), &request);
        report_attempt(self.metrics.as_ref(), &self.labels, &attempt);
        if !attempt.exit_code.is_success() {
            warn!(
                "couldn't upload exclude file to {}, rsync exit code {}",
                self.pair.remote_exclude_path, attempt.exit_code
            );
        }
        CycleOutcome::Completed { excluded, push: attempt.exit_code }
    }
}

impl ScheduledTask for SyncJob {
    fn name(&self) -> String {
        format!("sync {} -> {}", self.pair.source_template, self.pair.dest_dir)
    }

    fn run(&self) {
        self.run_cycle(Local::now().naive_local());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Gauge;
    use crate::metrics::testing::RecordingSink;
    use crate::transfer::TransferDirection;
    use std::fs;
    use std::sync::Mutex;

    /// Answers every direction with a fixed code; a successful payload pull
    /// drops `files` into the requested directory.
    struct Scripted {
        exclude_pull: ExitCode,
        payload: ExitCode,
        push: ExitCode,
        files: Vec<(&'static str, &'static str)>,
        requests: Mutex<Vec<TransferRequest>>,
    }

    impl Scripted {
        fn new(exclude_pull: ExitCode, payload: ExitCode, files: Vec<(&'static str, &'static str)>) -> Self {
            Self { exclude_pull, payload, push: ExitCode::SUCCESS, files, requests: Mutex::new(Vec::new()) }
        }

        fn failing_push(mut self, code: ExitCode) -> Self {
            self.push = code;
            self
        }

        fn directions(&self) -> Vec<TransferDirection> {
            self.requests.lock().unwrap().iter().map(|r| r.direction).collect()
        }
    }

    impl Transfer for Scripted {
        fn transfer(&self, request: &TransferRequest) -> ExitCode {
            self.requests.lock().unwrap().push(request.clone());
            match request.direction {
                TransferDirection::PullExclude => self.exclude_pull,
                TransferDirection::PullPayload => {
                    if self.payload.is_success() {
                        for (name, body) in &self.files {
                            fs::write(Path::new(&request.destination).join(name), body).unwrap();
                        }
                    }
                    self.payload
                }
                TransferDirection::PushExclude => self.push,
            }
        }
    }

    struct Fixture {
        _state: tempfile::TempDir,
        dest: tempfile::TempDir,
        ctx: JobContext,
        sink: Arc<RecordingSink>,
    }

    fn fixture(transfer: Arc<dyn Transfer>) -> Fixture {
        let state = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let ctx = JobContext {
            state_dir: state.path().to_path_buf(),
            limits: ExcludeLimits::default(),
            stand_name: "dev".into(),
            pod_name: "app-12345678-abcde".into(),
            transfer,
            metrics: sink.clone(),
        };
        Fixture { _state: state, dest, ctx, sink }
    }

    fn pair(dest: &Path) -> SyncPair {
        SyncPair {
            source_template: "rsync://u@h/share/in/_TODAY_*".into(),
            dest_dir: format!("{}/", dest.display()),
            exclude_file_name: "app_in_-dev-excludeFile".into(),
            remote_exclude_path: "rsync://u@h/exclude-files/app_in_-dev-excludeFile".into(),
        }
    }

    fn noon() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn failed_exclude_pull_starts_from_empty_list() {
        let tool = Arc::new(Scripted::new(ExitCode(23), ExitCode::SUCCESS, vec![("a.csv", "1\n")]));
        let fx = fixture(tool.clone());
        let job = SyncJob::new(pair(fx.dest.path()), &fx.ctx);
        fs::write(job.local_exclude_path(), "stale\n").unwrap();

        let outcome = job.run_cycle(noon());
        assert_eq!(
            outcome,
            CycleOutcome::Completed { excluded: vec!["a.csv".into()], push: ExitCode::SUCCESS }
        );
        assert_eq!(
            tool.directions(),
            vec![TransferDirection::PullExclude, TransferDirection::PullPayload, TransferDirection::PushExclude]
        );
        let payload = tool.requests.lock().unwrap()[1].clone();
        assert_eq!(payload.source, "rsync://u@h/share/in/20240301*");
        assert_eq!(fs::read_to_string(job.local_exclude_path()).unwrap(), "a.csv\n");
    }

    #[test]
    fn failed_payload_pull_skips_everything_after_it() {
        let tool = Arc::new(Scripted::new(ExitCode::SUCCESS, ExitCode(10), vec![]));
        let fx = fixture(tool.clone());
        let job = SyncJob::new(pair(fx.dest.path()), &fx.ctx);
        fs::write(job.local_exclude_path(), "old.csv\n").unwrap();

        assert_eq!(job.run_cycle(noon()), CycleOutcome::PayloadFailed(ExitCode(10)));
        assert_eq!(tool.directions(), vec![TransferDirection::PullExclude, TransferDirection::PullPayload]);
        assert_eq!(fs::read_to_string(job.local_exclude_path()).unwrap(), "old.csv\n");
        assert_eq!(fx.sink.get(Gauge::DownloadExitCode, &job.labels), Some(10.0));
        assert_eq!(fx.sink.get(Gauge::FileCount, &job.labels), None);
    }

    #[test]
    fn temp_dir_is_removed_after_the_cycle() {
        let tool = Arc::new(Scripted::new(ExitCode::SUCCESS, ExitCode::SUCCESS, vec![("b.csv", "2\n")]));
        let fx = fixture(tool.clone());
        let job = SyncJob::new(pair(fx.dest.path()), &fx.ctx);
        fs::write(job.local_exclude_path(), "").unwrap();

        job.run_cycle(noon());
        let leftovers: Vec<_> = fs::read_dir(&fx.ctx.state_dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_type().unwrap().is_dir())
            .collect();
        assert!(leftovers.is_empty());
        assert!(fx.dest.path().join("b.csv").exists());
        assert_eq!(fx.sink.get(Gauge::FileCount, &job.labels), Some(1.0));
    }

    #[test]
    fn failed_push_keeps_the_merged_list_locally() {
        let tool = Arc::new(
            Scripted::new(ExitCode::SUCCESS, ExitCode::SUCCESS, vec![("a.csv", "1\n")]).failing_push(ExitCode(23)),
        );
        let fx = fixture(tool.clone());
        let job = SyncJob::new(pair(fx.dest.path()), &fx.ctx);
        fs::write(job.local_exclude_path(), "old.csv\n").unwrap();

        let outcome = job.run_cycle(noon());
        assert_eq!(
            outcome,
            CycleOutcome::Completed { excluded: vec!["a.csv".into(), "old.csv".into()], push: ExitCode(23) }
        );
        assert_eq!(fs::read_to_string(job.local_exclude_path()).unwrap(), "a.csv\nold.csv\n");
        assert!(fx.dest.path().join("a.csv").exists());
        assert_eq!(fx.sink.get(Gauge::UploadExcludeExitCode, &job.labels), Some(23.0));
        assert_eq!(fx.sink.get(Gauge::DownloadExitCode, &job.labels), Some(0.0));
    }
}
