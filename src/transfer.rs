//! The external rsync process and its exit code taxonomy.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::util::unix_now;

/// Process exit code of one transfer tool invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// Reported when the tool could not be launched or was killed by a signal.
    pub const NOT_RUN: ExitCode = ExitCode(-1);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Human meaning of an rsync exit code; purely informational.
    pub fn meaning(self) -> &'static str {
        match self.0 {
            0 => "Success",
            1 => "Syntax or usage error",
            2 => "Protocol incompatibility",
            3 => "Errors selecting input/output files, dirs",
            4 => {
                "Requested action not supported: an attempt was made to manipulate 64-bit files on a platform that cannot support them; or an option was specified that is supported by the client and not by the server."
            }
            5 => "Error starting client-server protocol",
            6 => "Daemon unable to append to log-file",
            10 => "Error in socket I/O (maybe there is a problem with DNS resolution)",
            11 => "Error in file I/O (maybe there is no destination)",
            12 => "Error in rsync protocol data stream",
            13 => "Errors with program diagnostics",
            14 => "Error in IPC code",
            20 => "Received SIGUSR1 or SIGINT",
            21 => "Some error returned by waitpid()",
            22 => "Error allocating core memory buffers",
            23 => "Partial transfer due to error (maybe there are not files on remote side by the mask)",
            24 => "Partial transfer due to vanished source files",
            25 => "The --max-delete limit stopped deletions",
            30 => "Timeout in data send/receive",
            35 => "Timeout waiting for daemon connection",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.meaning())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    PullExclude,
    PullPayload,
    PushExclude,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferDirection::PullExclude => "pull-exclude",
            TransferDirection::PullPayload => "pull-payload",
            TransferDirection::PushExclude => "push-exclude",
        })
    }
}

/// One invocation of the transfer tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub direction: TransferDirection,
    pub source: String,
    pub destination: String,
    /// Local exclude file, only used when pulling payload.
    pub exclude_from: Option<PathBuf>,
}

impl TransferRequest {
    pub fn pull_exclude(remote: &str, local: &Path) -> Self {
        Self {
            direction: TransferDirection::PullExclude,
            source: remote.to_string(),
            destination: local.to_string_lossy().into_owned(),
            exclude_from: None,
        }
    }

    pub fn pull_payload(source: &str, into_dir: &Path, exclude_from: &Path) -> Self {
        let mut destination = into_dir.to_string_lossy().into_owned();
        if !destination.ends_with('/') {
            destination.push('/');
        }
        Self {
            direction: TransferDirection::PullPayload,
            source: source.to_string(),
            destination,
            exclude_from: Some(exclude_from.to_path_buf()),
        }
    }

    pub fn push_exclude(local: &Path, remote: &str) -> Self {
        Self {
            direction: TransferDirection::PushExclude,
            source: local.to_string_lossy().into_owned(),
            destination: remote.to_string(),
            exclude_from: None,
        }
    }
}

/// Timing and result of a transfer, reported to metrics and never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferAttempt {
    pub direction: TransferDirection,
    pub start_time: i64,
    pub stop_time: i64,
    pub exit_code: ExitCode,
}

/// Anything able to carry out a transfer request and report an exit code.
/// Implementations block until the transfer is over.
pub trait Transfer: Send + Sync {
    fn transfer(&self, request: &TransferRequest) -> ExitCode;
}

/// Run `request` and record its wall-clock bounds.
pub fn timed(tool: &dyn Transfer, request: &TransferRequest) -> TransferAttempt {
    let start_time = unix_now();
    let exit_code = tool.transfer(request);
    TransferAttempt { direction: request.direction, start_time, stop_time: unix_now(), exit_code }
}

/// The system `rsync` binary.
pub struct Rsync {
    program: PathBuf,
    password: Option<OsString>,
}

impl Rsync {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), password: None }
    }

    /// Password handed to the daemon through `RSYNC_PASSWORD` in the child's
    /// environment only.
    pub fn with_password(mut self, password: impl Into<OsString>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Command-line arguments for a request, without the program itself.
    pub fn args(request: &TransferRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if request.direction == TransferDirection::PullPayload {
            args.push("-azq".into());
            args.push("--partial".into());
        }
        if let Some(exclude) = &request.exclude_from {
            let mut flag = OsString::from("--exclude-from=");
            flag.push(exclude.as_os_str());
            args.push(flag);
        }
        args.push(request.source.clone().into());
        args.push(request.destination.clone().into());
        args
    }
}

impl Transfer for Rsync {
    fn transfer(&self, request: &TransferRequest) -> ExitCode {
        let mut cmd = Command::new(&self.program);
        cmd.args(Self::args(request));
        if let Some(password) = &self.password {
            cmd.env("RSYNC_PASSWORD", password);
        }
        let output = match cmd.output() {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(
                    direction = %request.direction,
                    program = %self.program.display(),
                    "failed to launch transfer tool: {}",
                    e
                );
                return ExitCode::NOT_RUN;
            }
        };
        let code = output.status.code().map(ExitCode).unwrap_or(ExitCode::NOT_RUN);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            tracing::debug!(direction = %request.direction, "rsync stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            if code.is_success() {
                tracing::debug!(direction = %request.direction, "rsync stderr: {}", stderr.trim());
            } else {
                tracing::warn!(direction = %request.direction, "rsync stderr: {}", stderr.trim());
            }
        }
        code
    }
}
