//! Per-pair exclude list: the filenames already retrieved for one
//! (source, destination) pair.
//!
//! On disk the list is newline-delimited UTF-8, one name per line, sorted
//! ascending, no header. In memory it is a deduplicated sorted `Vec`.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::ExcludeError;

/// Bounds applied after each merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExcludeLimits {
    /// Serialized size above which the list is truncated.
    pub max_bytes: u64,
    /// Entries kept when truncating.
    pub tail_lines: usize,
}

impl Default for ExcludeLimits {
    fn default() -> Self {
        Self { max_bytes: 9 * 1024 * 1024, tail_lines: 20_000 }
    }
}

/// Strategy deciding which entries survive once the list outgrows its bound.
pub trait TruncationPolicy: Send + Sync {
    fn truncate(&self, list: Vec<String>, limits: ExcludeLimits) -> Vec<String>;
}

/// Keeps the lexicographically last `tail_lines` entries.
///
/// Entries are sorted by name, not by arrival, so an early-alphabet name can
/// fall out of the list and be downloaded again once the list keeps growing.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlphabeticalTail;

impl TruncationPolicy for AlphabeticalTail {
    fn truncate(&self, list: Vec<String>, limits: ExcludeLimits) -> Vec<String> {
        truncate(list, limits)
    }
}

/// Union of the previous snapshot and the current listing, deduplicated and
/// sorted ascending. Two empty inputs give an empty list.
pub fn merge<I, J>(previous: I, current: J) -> Vec<String>
where
    I: IntoIterator<Item = String>,
    J: IntoIterator<Item = String>,
{
    previous
        .into_iter()
        .chain(current)
        .filter(|name| !name.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Bytes the list occupies on disk, one trailing newline per entry.
pub fn serialized_len(list: &[String]) -> u64 {
    list.iter().map(|s| s.len() as u64 + 1).sum()
}

/// Keep the last `tail_lines` entries when the serialized list exceeds
/// `max_bytes`; otherwise return it unchanged.
pub fn truncate(mut list: Vec<String>, limits: ExcludeLimits) -> Vec<String> {
    if serialized_len(&list) <= limits.max_bytes || list.len() <= limits.tail_lines {
        return list;
    }
    let cut = list.len() - limits.tail_lines;
    list.drain(..cut);
    list
}

/// Read a snapshot file. Blank lines are ignored.
pub fn read_snapshot(path: &Path) -> Result<Vec<String>, ExcludeError> {
    let content = fs::read_to_string(path)
        .map_err(|source| ExcludeError::Read { path: path.to_path_buf(), source })?;
    Ok(content.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
}

/// Replace the snapshot file with `list`.
pub fn write_snapshot(path: &Path, list: &[String]) -> Result<(), ExcludeError> {
    let write_err = |source| ExcludeError::Write { path: path.to_path_buf(), source };
    let file = fs::File::create(path).map_err(write_err)?;
    let mut out = BufWriter::new(file);
    for name in list {
        writeln!(out, "{}", name).map_err(write_err)?;
    }
    out.flush().map_err(write_err)
}

/// Create or empty the snapshot file.
pub fn reset_snapshot(path: &Path) -> Result<(), ExcludeError> {
    write_snapshot(path, &[])
}

/// Base names of every regular file under `dir`, recursively.
pub fn list_destination(dir: &Path) -> Result<Vec<String>, ExcludeError> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry =
            entry.map_err(|source| ExcludeError::Listing { path: dir.to_path_buf(), source })?;
        if entry.file_type().is_dir() {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Owner of one pair's local snapshot file.
pub struct ExcludeStore {
    path: PathBuf,
    limits: ExcludeLimits,
    policy: Box<dyn TruncationPolicy>,
}

impl ExcludeStore {
    pub fn new(path: PathBuf, limits: ExcludeLimits) -> Self {
        Self { path, limits, policy: Box::new(AlphabeticalTail) }
    }

    pub fn with_policy(mut self, policy: Box<dyn TruncationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<String>, ExcludeError> {
        read_snapshot(&self.path)
    }

    pub fn reset(&self) -> Result<(), ExcludeError> {
        reset_snapshot(&self.path)
    }

    /// Merge, bound and persist. Returns the list that was written.
    pub fn update(
        &self,
        previous: Vec<String>,
        current: Vec<String>,
    ) -> Result<Vec<String>, ExcludeError> {
        let merged = merge(previous, current);
        let bounded = self.policy.truncate(merged, self.limits);
        write_snapshot(&self.path, &bounded)?;
        Ok(bounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_is_sorted_deduplicated_union() {
        let merged = merge(names(&["f3", "f1"]), names(&["f2", "f1", "f3", "f0"]));
        assert_eq!(merged, names(&["f0", "f1", "f2", "f3"]));
    }

    #[test]
    fn merge_is_order_insensitive() {
        let a = names(&["b", "x", "a"]);
        let b = names(&["c", "a", "z"]);
        assert_eq!(merge(a.clone(), b.clone()), merge(b, a));
    }

    #[test]
    fn merge_with_empty_previous_is_listing() {
        assert_eq!(merge(Vec::new(), names(&["f2", "f1"])), names(&["f1", "f2"]));
    }

    #[test]
    fn merge_of_two_empty_sets_is_empty() {
        assert!(merge(Vec::<String>::new(), Vec::<String>::new()).is_empty());
    }

    #[test]
    fn merge_drops_duplicates_inside_previous() {
        assert_eq!(merge(names(&["a", "a", ""]), Vec::new()), names(&["a"]));
    }

    #[test]
    fn truncate_under_threshold_is_noop() {
        let list = names(&["a", "b", "c"]);
        let limits = ExcludeLimits { max_bytes: 6, tail_lines: 1 };
        assert_eq!(truncate(list.clone(), limits), list);
    }

    #[test]
    fn truncate_keeps_alphabetical_tail() {
        let list = names(&["aa", "bb", "cc", "dd"]);
        let limits = ExcludeLimits { max_bytes: 5, tail_lines: 2 };
        assert_eq!(truncate(list, limits), names(&["cc", "dd"]));
    }

    #[test]
    fn truncate_is_idempotent_at_the_bound() {
        let list: Vec<String> = (0..100).map(|i| format!("file-{i:03}")).collect();
        let limits = ExcludeLimits { max_bytes: 50, tail_lines: 10 };
        let once = truncate(list, limits);
        let twice = truncate(once.clone(), limits);
        assert_eq!(once.len(), 10);
        assert_eq!(once, twice);
        assert_eq!(once.first().map(String::as_str), Some("file-090"));
    }

    #[test]
    fn snapshot_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ex");
        write_snapshot(&path, &names(&["a", "b"])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
        assert_eq!(read_snapshot(&path).unwrap(), names(&["a", "b"]));
        reset_snapshot(&path).unwrap();
        assert!(read_snapshot(&path).unwrap().is_empty());
    }

    #[test]
    fn missing_snapshot_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_snapshot(&dir.path().join("absent")),
            Err(ExcludeError::Read { .. })
        ));
    }

    #[test]
    fn listing_is_recursive_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("top.csv"), "x").unwrap();
        fs::write(dir.path().join("sub").join("nested.csv"), "y").unwrap();
        let mut listed = list_destination(dir.path()).unwrap();
        listed.sort();
        assert_eq!(listed, names(&["nested.csv", "top.csv"]));
    }

    struct KeepFirst;

    impl TruncationPolicy for KeepFirst {
        fn truncate(&self, mut list: Vec<String>, limits: ExcludeLimits) -> Vec<String> {
            list.truncate(limits.tail_lines);
            list
        }
    }

    #[test]
    fn store_update_applies_policy_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ex");
        let limits = ExcludeLimits { max_bytes: 0, tail_lines: 2 };

        let store = ExcludeStore::new(path.clone(), limits);
        let written = store.update(names(&["c"]), names(&["a", "b"])).unwrap();
        assert_eq!(written, names(&["b", "c"]));
        assert_eq!(store.load().unwrap(), written);

        let store = ExcludeStore::new(path, limits).with_policy(Box::new(KeepFirst));
        let written = store.update(names(&["c"]), names(&["a", "b"])).unwrap();
        assert_eq!(written, names(&["a", "b"]));
    }
}
