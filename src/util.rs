use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Normalize a path-like string for internal use:
/// - converts backslashes to forward slashes
/// - collapses repeated slashes
/// - optionally preserves a trailing slash
pub fn normalize_path(p: &str, preserve_trailing_slash: bool) -> String {
    if p.is_empty() {
        return String::new();
    }
    let mut s = p.replace('\\', "/");
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    if !preserve_trailing_slash {
        // keep root "/"
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
    }
    s
}

/// Normalized directory string that always ends with exactly one `/`.
pub fn dir_with_separator(p: &str) -> String {
    let mut s = normalize_path(p, false);
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

/// Drop `.` components and resolve `..` against the preceding component
/// without touching the filesystem. `..` never climbs above the root.
pub fn collapse_dots(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in p.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Replace every `/` with `_`, the form used inside generated file names.
pub fn slashes_to_underscores(p: &str) -> String {
    p.replace('/', "_")
}

/// Seconds since the unix epoch; times before the epoch clamp to 0.
pub fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}

pub fn unix_now() -> i64 {
    unix_seconds(SystemTime::now())
}
