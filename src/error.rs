use std::path::PathBuf;

use thiserror::Error;

/// Startup configuration problems. Any of these aborts the process before a
/// single job is scheduled.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("number of items in DOWNLOAD_FROM ({sources}) and DOWNLOAD_TO ({destinations}) must be equal")]
    PairCountMismatch { sources: usize, destinations: usize },
    #[error("DOWNLOAD_FROM is empty, nothing to synchronise")]
    NoPairs,
    #[error("cannot resolve destination path {path}: {source}")]
    InvalidDestination {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pairs #{first} and #{second} both derive exclude file '{name}'")]
    DuplicateExcludeName { name: String, first: usize, second: usize },
    #[error("transfer tool '{0}' not found in PATH")]
    TransferToolMissing(String),
    #[error(transparent)]
    Naming(#[from] NamingError),
}

/// Failures while deriving the exclude file name or its remote location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("couldn't get deployment name from pod name '{0}'")]
    PodName(String),
    #[error("couldn't get path on the rsync server from source '{0}'")]
    RemotePath(String),
    #[error("couldn't get rsync host prefix from source '{0}'")]
    HostPrefix(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to create scheduler: {0}")]
    CreationFailed(#[source] tokio_cron_scheduler::JobSchedulerError),
    #[error("failed to register job '{job}' with cron '{cron}': {source}")]
    JobRegistrationFailed {
        job: String,
        cron: String,
        #[source]
        source: tokio_cron_scheduler::JobSchedulerError,
    },
    #[error("failed to start scheduler: {0}")]
    StartFailed(#[source] tokio_cron_scheduler::JobSchedulerError),
    #[error("failed to stop scheduler: {0}")]
    StopFailed(#[source] tokio_cron_scheduler::JobSchedulerError),
}

/// A single archive that could not be expanded.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("unknown file type {}", .0.display())]
    UnknownType(PathBuf),
    #[error("invalid file path in archive: {}", .0.display())]
    UnsafeEntry(PathBuf),
    #[error("refusing to overwrite {}", .0.display())]
    TargetExists(PathBuf),
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("zip error on {}: {source}", .path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io { path: path.into(), source }
    }
}

#[derive(Debug, Error)]
pub enum ExcludeError {
    #[error("could not read exclude file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write exclude file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not walk through {}: {source}", .path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}
