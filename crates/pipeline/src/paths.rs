//! Path resolution for archived sources and converted outputs.
//!
//! Every source file gets two sibling directories next to it: one holding the
//! archived original and one holding the converted MP4. Output names are
//! claimed through [`NameClaims`] so that two sources with the same stem never
//! resolve to the same output, even before any output exists on disk.

use batch_mp4_config::LayoutConfig;
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension of every converted output, always lowercase.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Infix marking an in-progress encoder write target.
pub const TEMP_INFIX: &str = ".temp.";

/// Errors raised while resolving paths for a source file.
#[derive(Debug, Error)]
pub enum PathError {
    /// The path has no final component (e.g. `/` or `..`).
    #[error("path has no file name: {}", .0.display())]
    NoFileName(PathBuf),
}

/// Names of the sibling directories used for archived and converted files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub archive_dir_name: String,
    pub converted_dir_name: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self::from_config(&LayoutConfig::default())
    }
}

impl Layout {
    pub fn from_config(cfg: &LayoutConfig) -> Self {
        Self {
            archive_dir_name: cfg.archive_dir.clone(),
            converted_dir_name: cfg.converted_dir.clone(),
        }
    }

    /// Archive directory for sources living in `parent`.
    pub fn archive_dir(&self, parent: &Path) -> PathBuf {
        parent.join(&self.archive_dir_name)
    }

    /// Converted directory for sources living in `parent`.
    pub fn converted_dir(&self, parent: &Path) -> PathBuf {
        parent.join(&self.converted_dir_name)
    }

    /// True if `name` is one of the two managed directory names.
    pub fn is_managed_dir_name(&self, name: &OsStr) -> bool {
        name == OsStr::new(&self.archive_dir_name) || name == OsStr::new(&self.converted_dir_name)
    }
}

/// Fully resolved locations for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub archive_dir: PathBuf,
    pub converted_dir: PathBuf,
    pub archive_path: PathBuf,
    pub output_path: PathBuf,
    pub temp_path: PathBuf,
}

/// Output file name for `stem` at a given collision index.
///
/// Index 0 is `<stem>.mp4`; index N is `<stem> (N).mp4`.
pub fn output_file_name(stem: &OsStr, index: u32) -> OsString {
    let mut name = stem.to_owned();
    if index > 0 {
        name.push(format!(" ({})", index));
    }
    name.push(".");
    name.push(OUTPUT_EXTENSION);
    name
}

/// Temp write target for an output: `<stem>.temp.mp4` in the same directory.
pub fn temp_path_for(output_path: &Path) -> PathBuf {
    let stem = output_path.file_stem().unwrap_or_default();
    let mut name = stem.to_owned();
    name.push(TEMP_INFIX);
    name.push(OUTPUT_EXTENSION);
    output_path.with_file_name(name)
}

/// Checks whether a path names a temp output (contains the `.temp.` infix).
pub fn is_temp_output(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().contains(TEMP_INFIX))
        .unwrap_or(false)
}

/// Parent directory of a source, treating a bare file name as `.`.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Checks whether `file_name` is `<stem>.mp4` or `<stem> (N).mp4`.
pub fn is_output_for_stem(file_name: &OsStr, stem: &OsStr) -> bool {
    let (Some(name), Some(stem)) = (file_name.to_str(), stem.to_str()) else {
        // Non-UTF-8 names only ever match the plain form
        return file_name == output_file_name(stem, 0).as_os_str();
    };

    let Some(rest) = name.strip_prefix(stem) else {
        return false;
    };
    let Some(rest) = rest.strip_suffix(OUTPUT_EXTENSION) else {
        return false;
    };
    let Some(rest) = rest.strip_suffix('.') else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }

    rest.strip_prefix(" (")
        .and_then(|r| r.strip_suffix(')'))
        .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Lists the published outputs in `converted_dir` that belong to `stem`.
///
/// Temp outputs are never part of the family. A missing directory yields an
/// empty list.
pub fn output_family(converted_dir: &Path, stem: &OsStr) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(converted_dir) else {
        return Vec::new();
    };

    let mut family: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| !is_temp_output(p))
        .filter(|p| {
            p.file_name()
                .map(|name| is_output_for_stem(name, stem))
                .unwrap_or(false)
        })
        .collect();
    family.sort();
    family
}

/// Output names claimed during one planning pass.
///
/// A name is free when it is neither on disk nor claimed earlier in the same
/// pass. Claiming happens on a single thread before any worker starts.
#[derive(Debug, Default)]
pub struct NameClaims {
    claimed: HashSet<PathBuf>,
}

impl NameClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the first free `<stem>.mp4` / `<stem> (N).mp4` in `converted_dir`.
    pub fn claim_output(&mut self, converted_dir: &Path, stem: &OsStr) -> PathBuf {
        let mut index = 0u32;
        loop {
            let candidate = converted_dir.join(output_file_name(stem, index));
            if !self.claimed.contains(&candidate) && !candidate.exists() {
                self.claimed.insert(candidate.clone());
                return candidate;
            }
            index += 1;
        }
    }
}

/// Resolves archive, output and temp locations for `source`.
///
/// The returned `output_path` is free on disk and newly claimed in `claims`.
/// The basename is kept verbatim; only the extension of the output changes.
pub fn resolve(
    source: &Path,
    layout: &Layout,
    claims: &mut NameClaims,
) -> Result<ResolvedPaths, PathError> {
    let file_name = source
        .file_name()
        .ok_or_else(|| PathError::NoFileName(source.to_path_buf()))?;
    let stem = Path::new(file_name).file_stem().unwrap_or(file_name);

    let parent = parent_dir(source);
    let archive_dir = layout.archive_dir(&parent);
    let converted_dir = layout.converted_dir(&parent);

    let archive_path = archive_dir.join(file_name);
    let output_path = claims.claim_output(&converted_dir, stem);
    let temp_path = temp_path_for(&output_path);

    Ok(ResolvedPaths {
        archive_dir,
        converted_dir,
        archive_path,
        output_path,
        temp_path,
    })
}
