//! Scanner module for discovering conversion candidates.
//!
//! Walks the given roots once and returns a snapshot of every video file that
//! still needs work: fresh sources sitting in a scanned directory, and
//! archived sources whose conversion has not been published yet (a failed
//! encode from an earlier run).

use crate::paths::{is_temp_output, output_family, parent_dir, Layout};
use batch_mp4_config::ScanConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// Where a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrigin {
    /// Found in a scanned directory; the archive step is still ahead.
    Fresh,
    /// Found in an archive directory with no published output.
    Archived,
}

/// A candidate video file discovered during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    /// Full path to the video file as found on disk.
    pub path: PathBuf,
    pub origin: CandidateOrigin,
}

/// Scan settings derived from configuration.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub recursive: bool,
    /// Lowercase extensions without the leading dot.
    pub extensions: Vec<String>,
    pub layout: Layout,
}

impl ScanOptions {
    pub fn new(cfg: &ScanConfig, layout: Layout) -> Self {
        Self {
            recursive: cfg.recursive,
            extensions: cfg
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            layout,
        }
    }
}

/// Checks if a file has one of `extensions` (case-insensitive).
pub fn is_video_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = ext.to_lowercase();
            extensions.iter().any(|e| *e == ext_lower)
        })
        .unwrap_or(false)
}

/// Checks whether an archived file already has a published conversion.
///
/// A published output carries the archived source's modification time, so an
/// output in the same name family with an identical mtime marks the archive
/// as done.
pub fn has_published_output(archived: &Path, layout: &Layout) -> bool {
    let Some(stem) = archived.file_stem() else {
        return false;
    };
    let Ok(source_mtime) = fs::metadata(archived).and_then(|m| m.modified()) else {
        return false;
    };

    // original/<name> -> <dir>/converted
    let dir = parent_dir(&parent_dir(archived));
    let converted_dir = layout.converted_dir(&dir);

    output_family(&converted_dir, stem)
        .iter()
        .any(|output| output_mtime(output) == Some(source_mtime))
}

fn output_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Lists archived files in `dir`'s archive directory that still need converting.
fn pending_archives(dir: &Path, options: &ScanOptions) -> Vec<ScanCandidate> {
    let archive_dir = options.layout.archive_dir(dir);
    let Ok(entries) = fs::read_dir(&archive_dir) else {
        return Vec::new();
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| is_video_file(p, &options.extensions))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .filter(|p| {
            let done = has_published_output(p, &options.layout);
            if done {
                debug!(path = %p.display(), "archived source already converted");
            }
            !done
        })
        .map(|path| ScanCandidate {
            path,
            origin: CandidateOrigin::Archived,
        })
        .collect()
}

/// Scans the given roots for conversion candidates.
///
/// This function:
/// - Walks each root (recursively unless disabled) in file-name order
/// - Skips hidden directories and the managed archive/converted directories
/// - Filters files by video extension (case-insensitive), ignoring temp outputs
/// - Adds archived files without a published output, listed when their
///   directory is visited
///
/// The result is a snapshot: files created after the scan are not included.
pub fn scan_roots(roots: &[PathBuf], options: &ScanOptions) -> Vec<ScanCandidate> {
    let mut candidates = Vec::new();
    let max_depth = if options.recursive { usize::MAX } else { 1 };

    for root in roots {
        if !root.exists() {
            debug!(root = %root.display(), "scan root does not exist");
            continue;
        }

        let layout = &options.layout;
        let walker = WalkDir::new(root)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name();
                !name.to_string_lossy().starts_with('.') && !layout.is_managed_dir_name(name)
            });

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();

            if entry.file_type().is_dir() {
                // Non-recursive scans only look at the root's own archive
                if options.recursive || entry.depth() == 0 {
                    candidates.extend(pending_archives(path, options));
                }
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            if !is_video_file(path, &options.extensions) || is_temp_output(path) {
                continue;
            }

            candidates.push(ScanCandidate {
                path: path.to_path_buf(),
                origin: CandidateOrigin::Fresh,
            });
        }
    }

    candidates
}
