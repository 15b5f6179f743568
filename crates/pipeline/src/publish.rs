//! Atomic publisher and interrupt rollback.
//!
//! A finished temp output becomes visible under its final name through a
//! single rename, so a reader of the converted directory never sees a partial
//! MP4 under a final name. Jobs that are in flight when the run is
//! interrupted are undone through their [`RollbackRecord`].

use crate::archive::{self, ArchiveError};
use crate::job::Job;
use crate::paths::parent_dir;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Smallest mtime nudge used to tell same-named sources apart.
const STAMP_STEP: Duration = Duration::from_micros(1);

/// Errors that can occur while publishing a finished conversion.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Copying the source modification time onto the output failed.
    #[error("Failed to stamp {}: {source}", .path.display())]
    Stamp { path: PathBuf, source: io::Error },

    /// Renaming the temp output into place failed.
    #[error("Failed to rename {} to {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Something else already sits at the output path.
    #[error("Output {} already exists", .0.display())]
    AlreadyExists(PathBuf),
}

/// Errors that can occur while undoing an interrupted job.
#[derive(Debug, Error)]
pub enum RollbackError {
    /// Failed to delete the temp output.
    #[error("Failed to delete temp output {}: {source}", .path.display())]
    Temp { path: PathBuf, source: io::Error },

    /// Failed to move the archived source back.
    #[error("Failed to restore source: {0}")]
    Restore(#[from] ArchiveError),
}

/// Publishes a finished conversion.
///
/// This function performs the following steps:
/// 1. Refuse to proceed if `output_path` is already taken
/// 2. Copy the archived source's modification time onto the temp output
/// 3. Rename `temp_path` to `output_path`
///
/// The copied modification time is what later runs use to recognise the
/// archived source as converted. When another file with the same stem next to
/// the source or in the archive carries the same mtime, the archived source is
/// first nudged to a free mtime so the stamp identifies only this source.
///
/// # Arguments
///
/// * `job` - Job whose temp output is complete
///
/// # Returns
///
/// * `Ok(())` if the output is in place
/// * `Err(PublishError)` if any step failed; the temp output is left for the
///   caller to discard
pub fn publish(job: &Job) -> Result<(), PublishError> {
    if job.output_path.exists() {
        return Err(PublishError::AlreadyExists(job.output_path.clone()));
    }

    let stamp = unique_stamp(job).map_err(|source| PublishError::Stamp {
        path: job.archive_path.clone(),
        source,
    })?;
    stamp_mtime(&job.temp_path, stamp)?;

    fs::rename(&job.temp_path, &job.output_path).map_err(|source| PublishError::Rename {
        from: job.temp_path.clone(),
        to: job.output_path.clone(),
        source,
    })
}

/// Modification time of the archived source, made distinct from every
/// same-stem sibling in the source and archive directories.
fn unique_stamp(job: &Job) -> io::Result<SystemTime> {
    let mtime = fs::metadata(&job.archive_path)?.modified()?;
    let taken = sibling_mtimes(job);

    let mut stamp = mtime;
    while taken.contains(&stamp) {
        stamp += STAMP_STEP;
    }
    if stamp != mtime {
        File::options()
            .write(true)
            .open(&job.archive_path)?
            .set_modified(stamp)?;
    }
    Ok(stamp)
}

fn sibling_mtimes(job: &Job) -> HashSet<SystemTime> {
    let stem = job.archive_path.file_stem();
    let source_dir = parent_dir(&job.source_path);

    [job.archive_dir.as_path(), source_dir.as_path()]
        .into_iter()
        .filter_map(|dir| fs::read_dir(dir).ok())
        .flat_map(|entries| entries.filter_map(|e| e.ok()))
        .map(|entry| entry.path())
        .filter(|path| *path != job.archive_path && path.file_stem() == stem)
        .filter_map(|path| fs::metadata(&path).ok())
        .filter(|meta| meta.is_file())
        .filter_map(|meta| meta.modified().ok())
        .collect()
}

fn stamp_mtime(target: &Path, mtime: SystemTime) -> Result<(), PublishError> {
    File::options()
        .write(true)
        .open(target)
        .and_then(|file| file.set_modified(mtime))
        .map_err(|source| PublishError::Stamp {
            path: target.to_path_buf(),
            source,
        })
}

/// Deletes a temp output. A missing file is not an error.
pub fn discard_temp(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// What it takes to put one in-flight job back the way it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackRecord {
    pub job_id: usize,
    pub source_path: PathBuf,
    pub archive_path: PathBuf,
    pub temp_path: PathBuf,
    /// True when this run moved the source into the archive
    pub restore_source: bool,
}

impl RollbackRecord {
    pub fn for_job(job: &Job, restore_source: bool) -> Self {
        Self {
            job_id: job.id,
            source_path: job.source_path.clone(),
            archive_path: job.archive_path.clone(),
            temp_path: job.temp_path.clone(),
            restore_source,
        }
    }

    /// Deletes the temp output and, if this run archived the source, moves
    /// it back to where it was found.
    pub fn rollback(&self) -> Result<(), RollbackError> {
        discard_temp(&self.temp_path).map_err(|source| RollbackError::Temp {
            path: self.temp_path.clone(),
            source,
        })?;

        if self.restore_source && self.archive_path.exists() {
            archive::restore(&self.archive_path, &self.source_path)?;
        }
        Ok(())
    }
}

/// Registry of jobs that have touched the filesystem and are not finished.
///
/// Whoever takes a record out owns its rollback; a record is never rolled
/// back twice.
#[derive(Debug, Default)]
pub struct InFlight {
    records: Mutex<HashMap<usize, RollbackRecord>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, RollbackRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register(&self, record: RollbackRecord) {
        self.lock().insert(record.job_id, record);
    }

    /// Removes and returns the record for `job_id`, if still registered.
    pub fn take(&self, job_id: usize) -> Option<RollbackRecord> {
        self.lock().remove(&job_id)
    }

    /// Removes every remaining record, ordered by job id.
    pub fn drain(&self) -> Vec<RollbackRecord> {
        let mut records: Vec<RollbackRecord> = self.lock().drain().map(|(_, r)| r).collect();
        records.sort_by_key(|r| r.job_id);
        records
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::archive;
    use crate::job::plan_jobs;
    use crate::paths::Layout;
    use crate::scan::{CandidateOrigin, ScanCandidate};
    use tempfile::TempDir;

    fn set_mtime(path: &Path, mtime: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    fn mtime(path: &Path) -> SystemTime {
        fs::metadata(path).unwrap().modified().unwrap()
    }

    /// Archived job with a finished temp output
    fn converted_job(root: &Path) -> Job {
        let source = root.join("a.mkv");
        fs::write(&source, b"source").unwrap();
        let candidate = ScanCandidate {
            path: source,
            origin: CandidateOrigin::Fresh,
        };
        let job = plan_jobs(&[candidate], &Layout::default()).remove(0);
        archive(&job).unwrap();
        fs::create_dir_all(&job.converted_dir).unwrap();
        fs::write(&job.temp_path, b"encoded").unwrap();
        job
    }

    #[test]
    fn test_publish_renames_and_stamps() {
        let temp_dir = TempDir::new().unwrap();
        let job = converted_job(temp_dir.path());
        let source_mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        set_mtime(&job.archive_path, source_mtime);

        publish(&job).unwrap();

        assert!(!job.temp_path.exists());
        assert_eq!(fs::read(&job.output_path).unwrap(), b"encoded");
        assert_eq!(mtime(&job.output_path), source_mtime);
        assert_eq!(mtime(&job.archive_path), source_mtime, "no sibling, no nudge");
    }

    #[test]
    fn test_publish_stamp_is_unique_among_same_stem_sources() {
        let temp_dir = TempDir::new().unwrap();
        let job = converted_job(temp_dir.path());
        let shared = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        set_mtime(&job.archive_path, shared);
        // a.mp4 archived beside a.mkv, and an a.avi still waiting in place
        let archived_sibling = job.archive_dir.join("a.mp4");
        let fresh_sibling = temp_dir.path().join("a.avi");
        for sibling in [&archived_sibling, &fresh_sibling] {
            fs::write(sibling, b"other").unwrap();
            set_mtime(sibling, shared);
        }
        set_mtime(&fresh_sibling, shared + STAMP_STEP);

        publish(&job).unwrap();

        let stamp = mtime(&job.output_path);
        assert_eq!(stamp, shared + STAMP_STEP * 2);
        assert_eq!(mtime(&job.archive_path), stamp);
        assert_eq!(mtime(&archived_sibling), shared, "siblings are never touched");
        assert_eq!(mtime(&fresh_sibling), shared + STAMP_STEP);
    }

    #[test]
    fn test_publish_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let job = converted_job(temp_dir.path());
        fs::write(&job.output_path, b"someone else's").unwrap();

        let result = publish(&job);

        assert!(matches!(result, Err(PublishError::AlreadyExists(_))));
        assert_eq!(fs::read(&job.output_path).unwrap(), b"someone else's");
        assert!(job.temp_path.exists());
    }

    #[test]
    fn test_publish_without_temp_fails() {
        let temp_dir = TempDir::new().unwrap();
        let job = converted_job(temp_dir.path());
        fs::remove_file(&job.temp_path).unwrap();

        assert!(matches!(publish(&job), Err(PublishError::Stamp { .. })));
        assert!(!job.output_path.exists());
    }

    #[test]
    fn test_discard_temp_tolerates_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("x.temp.mp4");
        discard_temp(&path).unwrap();
        fs::write(&path, b"x").unwrap();
        discard_temp(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_rollback_restores_source() {
        let temp_dir = TempDir::new().unwrap();
        let job = converted_job(temp_dir.path());
        let record = RollbackRecord::for_job(&job, true);

        record.rollback().unwrap();

        assert_eq!(fs::read(&job.source_path).unwrap(), b"source");
        assert!(!job.archive_path.exists());
        assert!(!job.temp_path.exists());
    }

    #[test]
    fn test_rollback_leaves_found_archive_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let job = converted_job(temp_dir.path());
        let record = RollbackRecord::for_job(&job, false);

        record.rollback().unwrap();

        assert!(job.archive_path.exists());
        assert!(!job.source_path.exists());
        assert!(!job.temp_path.exists());
    }

    #[test]
    fn test_in_flight_take_and_drain() {
        let temp_dir = TempDir::new().unwrap();
        let job = converted_job(temp_dir.path());
        let in_flight = InFlight::new();

        for id in [4, 1, 7] {
            let mut record = RollbackRecord::for_job(&job, true);
            record.job_id = id;
            in_flight.register(record);
        }
        assert_eq!(in_flight.len(), 3);

        assert_eq!(in_flight.take(4).map(|r| r.job_id), Some(4));
        assert!(in_flight.take(4).is_none(), "a record is handed out once");

        let ids: Vec<usize> = in_flight.drain().iter().map(|r| r.job_id).collect();
        assert_eq!(ids, vec![1, 7]);
        assert!(in_flight.is_empty());
    }
}
