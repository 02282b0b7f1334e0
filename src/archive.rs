//! Expansion of archives that arrive with the payload.
//!
//! Supported containers:
//! - **Zip**: every entry extracted relative to the destination
//! - **Gzip**: inflated to the name stored in its header

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use flate2::read::GzDecoder;
use regex::Regex;

use crate::error::ArchiveError;

// Only names that look like archives are sniffed; payload CSVs can be large.
static ARCHIVE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(zip|gz|gzip)").expect("valid archive name pattern"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Gzip,
}

impl ArchiveKind {
    /// Identify a container from its leading bytes.
    pub fn detect(header: &[u8]) -> Option<ArchiveKind> {
        if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
            Some(ArchiveKind::Zip)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveKind::Gzip)
        } else {
            None
        }
    }

    pub fn detect_file(path: &Path) -> io::Result<Option<ArchiveKind>> {
        let mut header = [0u8; 4];
        let mut file = fs::File::open(path)?;
        let mut read = 0;
        while read < header.len() {
            let n = file.read(&mut header[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(Self::detect(&header[..read]))
    }
}

#[derive(Debug, Default)]
pub struct ExpandReport {
    /// Archives that were expanded and removed.
    pub expanded: Vec<PathBuf>,
    /// Files produced by the expansion.
    pub extracted: Vec<PathBuf>,
    pub failures: Vec<ArchiveError>,
}

impl ExpandReport {
    /// All failures joined into one message, or `None` when there were none.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let parts: Vec<String> = self.failures.iter().map(|e| e.to_string()).collect();
        Some(parts.join("; "))
    }
}

/// Expand every archive at the top level of `dir` into `dir`, removing each
/// archive that expanded cleanly. One failure never stops the others.
pub fn expand_archives(dir: &Path) -> ExpandReport {
    let mut report = ExpandReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            report.failures.push(ArchiveError::io(dir, e));
            return report;
        }
    };
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| ARCHIVE_NAME_RE.is_match(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    candidates.sort();

    for archive in candidates {
        tracing::info!("unarchive the file {}", archive.display());
        match expand_one(&archive, dir) {
            Ok(mut produced) => {
                tracing::info!("remove the file {}", archive.display());
                if let Err(e) = fs::remove_file(&archive) {
                    report.failures.push(ArchiveError::io(&archive, e));
                }
                report.extracted.append(&mut produced);
                report.expanded.push(archive);
            }
            Err(e) => report.failures.push(e),
        }
    }
    report
}

/// Expand one archive into `dest`, returning the files written.
pub fn expand_one(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let kind = ArchiveKind::detect_file(archive)
        .map_err(|e| ArchiveError::io(archive, e))?
        .ok_or_else(|| ArchiveError::UnknownType(archive.to_path_buf()))?;
    match kind {
        ArchiveKind::Zip => unzip(archive, dest),
        ArchiveKind::Gzip => ungzip(archive, dest).map(|p| vec![p]),
    }
}

/// Join an archive-supplied relative path onto `dest`, refusing anything that
/// would land outside it.
fn contained_path(dest: &Path, entry: &Path) -> Option<PathBuf> {
    let mut out = dest.to_path_buf();
    let mut depth = 0usize;
    for component in entry.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (depth > 0).then_some(out)
}

fn unzip(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let zip_err = |source| ArchiveError::Zip { path: archive.to_path_buf(), source };
    let file = fs::File::open(archive).map_err(|e| ArchiveError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;
    let mut written = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        let raw_name = PathBuf::from(entry.name());
        let target = contained_path(dest, &raw_name)
            .ok_or_else(|| ArchiveError::UnsafeEntry(raw_name.clone()))?;

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| ArchiveError::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }
        let mut out = fs::File::create(&target).map_err(|e| ArchiveError::io(&target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| ArchiveError::io(&target, e))?;
        written.push(target);
    }
    Ok(written)
}

fn ungzip(archive: &Path, dest: &Path) -> Result<PathBuf, ArchiveError> {
    let file = fs::File::open(archive).map_err(|e| ArchiveError::io(archive, e))?;
    let mut decoder = GzDecoder::new(file);
    let mut tmp =
        tempfile::NamedTempFile::new_in(dest).map_err(|e| ArchiveError::io(dest, e))?;
    io::copy(&mut decoder, tmp.as_file_mut()).map_err(|e| ArchiveError::io(archive, e))?;

    // never replace the archive itself or a file that is already there
    let mut target = dest.join(gunzipped_name(archive, decoder.header().and_then(|h| h.filename())));
    if target.exists() {
        let fallback = dest.join(gunzipped_name(archive, None));
        if fallback.exists() {
            return Err(ArchiveError::TargetExists(target));
        }
        target = fallback;
    }
    tmp.persist_noclobber(&target).map_err(|e| ArchiveError::io(&target, e.error))?;
    Ok(target)
}

/// Output name for a gzip member: the header's file name (last component
/// only), else the archive name without its gzip suffix.
fn gunzipped_name(archive: &Path, header_name: Option<&[u8]>) -> String {
    if let Some(raw) = header_name {
        let name = String::from_utf8_lossy(raw);
        if let Some(base) = Path::new(name.as_ref()).file_name() {
            return base.to_string_lossy().into_owned();
        }
    }
    let name = archive.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    for suffix in [".gzip", ".gz"] {
        if let Some(stem) = name.strip_suffix(suffix)
            && !stem.is_empty()
        {
            return stem.to_string();
        }
    }
    format!("{}.out", name)
}
