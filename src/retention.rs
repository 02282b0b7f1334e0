//! Age-based cleanup of destination directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use regex::Regex;
use walkdir::WalkDir;

use crate::scheduler::ScheduledTask;

/// Name shape of rsync's in-progress files: `.<name>.<6 random chars>`.
pub static PARTIAL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\..+\.\w{6}$").expect("valid partial name pattern"));

#[derive(Clone, Debug)]
pub struct RetentionTarget {
    pub dir: PathBuf,
    pub max_age_complete: Duration,
    pub max_age_partial: Duration,
    pub partial_pattern: Regex,
}

impl RetentionTarget {
    pub fn new(dir: impl Into<PathBuf>, complete_hours: u64, partial_hours: u64) -> Self {
        Self {
            dir: dir.into(),
            max_age_complete: Duration::from_secs(complete_hours.saturating_mul(3600)),
            max_age_partial: Duration::from_secs(partial_hours.saturating_mul(3600)),
            partial_pattern: PARTIAL_NAME_RE.clone(),
        }
    }

    fn is_partial(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| self.partial_pattern.is_match(&n.to_string_lossy()))
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub partial_deleted: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

/// Delete what has aged out of `target.dir` as of `now`.
///
/// Every non-directory entry is checked against the complete-file age; entries
/// that look like partial transfers are also checked against the shorter
/// partial age. A file modified in the future is never deleted.
pub fn sweep(target: &RetentionTarget, now: SystemTime) -> SweepReport {
    sweep_with(target, now, |path| fs::remove_file(path))
}

fn sweep_with<F>(target: &RetentionTarget, now: SystemTime, remove: F) -> SweepReport
where
    F: Fn(&Path) -> io::Result<()>,
{
    let mut report = SweepReport::default();
    tracing::info!("start deleting old files in {}", target.dir.display());

    for entry in WalkDir::new(&target.dir).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| target.dir.clone());
                tracing::warn!("couldn't walk {}: {}", path.display(), e);
                report.failures.push((path, e.to_string()));
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let modified = entry
            .metadata()
            .map_err(|e| e.to_string())
            .and_then(|m| m.modified().map_err(|e| e.to_string()));
        let age = match modified {
            Ok(modified) => match now.duration_since(modified) {
                Ok(age) => age,
                Err(_) => continue,
            },
            Err(e) => {
                tracing::warn!("couldn't stat {}: {}", path.display(), e);
                report.failures.push((path.to_path_buf(), e));
                continue;
            }
        };

        let partial = target.is_partial(path);
        let expired = age > target.max_age_complete || (partial && age > target.max_age_partial);
        if !expired {
            continue;
        }
        match remove(path) {
            Ok(()) => {
                tracing::info!("deleted {} (age {}s)", path.display(), age.as_secs());
                if partial && age <= target.max_age_complete {
                    report.partial_deleted.push(path.to_path_buf());
                } else {
                    report.deleted.push(path.to_path_buf());
                }
            }
            Err(e) => {
                tracing::warn!("couldn't delete {}: {}", path.display(), e);
                report.failures.push((path.to_path_buf(), e.to_string()));
            }
        }
    }

    tracing::info!(
        deleted = report.deleted.len(),
        partial_deleted = report.partial_deleted.len(),
        failures = report.failures.len(),
        "stop deleting old files in {}",
        target.dir.display()
    );
    report
}

impl ScheduledTask for RetentionTarget {
    fn name(&self) -> String {
        format!("retention {}", self.dir.display())
    }

    fn run(&self) {
        sweep(self, SystemTime::now());
    }
}
