//! Archiver: moves a source into its archive directory exactly once.
//!
//! The move is a rename, never a copy, so the file never exists in both
//! places after a successful archive.

use crate::job::Job;
use crate::scan::CandidateOrigin;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while archiving or restoring a source.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Failed to create the archive directory.
    #[error("failed to create archive directory {}: {source}", .dir.display())]
    CreateDir { dir: PathBuf, source: io::Error },

    /// Rename from one location to the other failed.
    #[error("failed to move {} to {}: {source}", .from.display(), .to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Destination already holds a different file.
    #[error("{} already exists; refusing to overwrite it", .0.display())]
    Occupied(PathBuf),

    /// Neither the source nor its archived copy exists.
    #[error("source {} has disappeared", .0.display())]
    MissingSource(PathBuf),
}

/// What the archive step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Source renamed into the archive directory during this call.
    Moved,
    /// Archive already in place from an earlier run; nothing to do.
    AlreadyArchived,
}

/// Moves `job.source_path` to `job.archive_path`.
///
/// - Job found in the archive: returns `AlreadyArchived` whatever sits at
///   `source_path` now; a newer file there is left alone.
/// - Archive present and source gone: the move already happened, returns
///   `AlreadyArchived`.
/// - Archive present and source present: the archive slot belongs to another
///   file, returns `Occupied`.
/// - Otherwise creates the archive directory and renames the source into it.
pub fn archive(job: &Job) -> Result<ArchiveOutcome, ArchiveError> {
    if job.origin == CandidateOrigin::Archived {
        if job.archive_path.exists() {
            return Ok(ArchiveOutcome::AlreadyArchived);
        }
        return Err(ArchiveError::MissingSource(job.archive_path.clone()));
    }

    let source_exists = job.source_path.exists();

    if job.archive_path.exists() {
        if source_exists {
            return Err(ArchiveError::Occupied(job.archive_path.clone()));
        }
        return Ok(ArchiveOutcome::AlreadyArchived);
    }

    if !source_exists {
        return Err(ArchiveError::MissingSource(job.source_path.clone()));
    }

    fs::create_dir_all(&job.archive_dir).map_err(|source| ArchiveError::CreateDir {
        dir: job.archive_dir.clone(),
        source,
    })?;

    move_file(&job.source_path, &job.archive_path)?;
    Ok(ArchiveOutcome::Moved)
}

/// Moves an archived file back to where it was found.
pub fn restore(archive_path: &Path, source_path: &Path) -> Result<(), ArchiveError> {
    if source_path.exists() {
        return Err(ArchiveError::Occupied(source_path.to_path_buf()));
    }
    move_file(archive_path, source_path)
}

fn move_file(from: &Path, to: &Path) -> Result<(), ArchiveError> {
    fs::rename(from, to).map_err(|source| ArchiveError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}
