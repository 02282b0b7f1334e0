//! Filesystem steps of a sync cycle: moving pulled files into place and
//! summarising a destination directory.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::util::{human_bytes, unix_seconds};

/// Move `src` to `dest`. A plain rename is tried first; across devices the
/// file is copied next to the target as `tmp_<name>` and renamed over it.
pub fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    if src == dest {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }

    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"))?;
    let mut tmp_name = std::ffi::OsString::from("tmp_");
    tmp_name.push(file_name);
    let tmp_path = dest.with_file_name(tmp_name);

    if let Err(e) = fs::copy(src, &tmp_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    if let Err(e) = rename_with_retries(&tmp_path, dest) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::remove_file(src)
}

fn rename_with_retries(tmp_path: &Path, target: &Path) -> io::Result<()> {
    let mut attempts = 0;
    loop {
        match fs::rename(tmp_path, target) {
            Ok(()) => return Ok(()),
            Err(e) => {
                let kind = e.kind();
                if attempts < 2
                    && (kind == io::ErrorKind::AlreadyExists
                        || kind == io::ErrorKind::PermissionDenied)
                {
                    // try deleting target and retry
                    let _ = fs::remove_file(target);
                    std::thread::sleep(Duration::from_millis(50));
                    attempts += 1;
                    continue;
                }
                return Err(e);
            }
        }
    }
}

pub fn count_lines(path: &Path) -> io::Result<usize> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut buf = Vec::new();
    let mut lines = 0;
    while reader.read_until(b'\n', &mut buf)? > 0 {
        lines += 1;
        buf.clear();
    }
    Ok(lines)
}

/// Outcome of staging pulled files into a destination.
#[derive(Debug, Default)]
pub struct StagedFiles {
    /// File names that now live in the destination.
    pub moved: Vec<String>,
    pub failures: Vec<(PathBuf, io::Error)>,
}

/// Log every regular file pulled into `staging` and move it, flattened by
/// name, into `dest_dir`. Failures are collected per file.
pub fn stage_into(staging: &Path, dest_dir: &Path) -> StagedFiles {
    let mut staged = StagedFiles::default();
    for entry in WalkDir::new(staging).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| staging.to_path_buf());
                staged.failures.push((path, io::Error::other(e.to_string())));
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let lines = count_lines(entry.path()).unwrap_or_else(|e| {
            tracing::warn!("could not count lines of {}: {}", entry.path().display(), e);
            0
        });
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        tracing::info!(
            "the file {} was downloaded, it has {} lines, size is {}",
            name,
            lines,
            human_bytes(size)
        );
        match move_file(entry.path(), &dest_dir.join(&name)) {
            Ok(()) => staged.moved.push(name),
            Err(e) => staged.failures.push((entry.path().to_path_buf(), e)),
        }
    }
    staged
}

/// Age and size summary of the top level of a destination directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirStats {
    /// Newest modification time over all entries (unix seconds).
    pub newest: i64,
    /// Oldest modification time over non-directories (unix seconds).
    pub oldest: i64,
    pub count: i64,
}

impl DirStats {
    pub const UNREADABLE: DirStats = DirStats { newest: -1, oldest: -1, count: -1 };
}

pub fn dir_stats(dir: &Path, now: SystemTime) -> DirStats {
    let entries = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::warn!(
                "couldn't read {} for directory stats, reporting -1: {}",
                dir.display(),
                e
            );
            return DirStats::UNREADABLE;
        }
    };
    let mut stats = DirStats { newest: 0, oldest: unix_seconds(now), count: 0 };
    for entry in entries.flatten() {
        stats.count += 1;
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        let ts = unix_seconds(modified);
        if !meta.is_dir() && ts < stats.oldest {
            stats.oldest = ts;
        }
        if ts > stats.newest {
            stats.newest = ts;
        }
    }
    stats
}
