//! Job descriptors for one run.
//!
//! Jobs are rebuilt from a scan on every run; there is no job store. The
//! planning pass claims every output name on one thread before any worker
//! starts, so workers never race for a name.

use crate::paths::{parent_dir, resolve, Layout, NameClaims, PathError};
use crate::scan::{CandidateOrigin, ScanCandidate};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Stage of a job in the conversion pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Built from a scan, nothing touched yet
    Discovered,
    /// Source is being moved into the archive directory
    Archiving,
    /// Source sits in the archive directory
    Archived,
    /// Encoder is writing the temp output
    Converting,
    /// Output renamed into place
    Published,
    /// Job abandoned with the given reason
    Failed(String),
    /// Interrupted and restored to how it was found
    RolledBack,
}

impl JobState {
    /// Convert state to string for logs
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Discovered => "discovered",
            JobState::Archiving => "archiving",
            JobState::Archived => "archived",
            JobState::Converting => "converting",
            JobState::Published => "published",
            JobState::Failed(_) => "failed",
            JobState::RolledBack => "rolled_back",
        }
    }
}

/// One file's archive-convert-publish unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Position in dispatch order, unique within a run
    pub id: usize,
    pub origin: CandidateOrigin,
    /// Where the file was found (or, for archived candidates, where a
    /// rollback would put it back)
    pub source_path: PathBuf,
    pub archive_dir: PathBuf,
    pub archive_path: PathBuf,
    pub converted_dir: PathBuf,
    pub output_path: PathBuf,
    pub temp_path: PathBuf,
    pub state: JobState,
}

impl Job {
    /// Short label for console lines: the source file name.
    pub fn label(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }

    /// Path the encoder reads from. Always the archived copy.
    pub fn input_path(&self) -> &Path {
        &self.archive_path
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} → {}",
            self.source_path.display(),
            self.output_path.display()
        )
    }
}

/// Builds a job for one candidate, claiming its output name.
///
/// Pure apart from the existence checks the name claim needs.
pub fn build_job(
    id: usize,
    candidate: &ScanCandidate,
    layout: &Layout,
    claims: &mut NameClaims,
) -> Result<Job, PathError> {
    let source_path = match candidate.origin {
        CandidateOrigin::Fresh => candidate.path.clone(),
        CandidateOrigin::Archived => {
            let file_name = candidate
                .path
                .file_name()
                .ok_or_else(|| PathError::NoFileName(candidate.path.clone()))?;
            parent_dir(&parent_dir(&candidate.path)).join(file_name)
        }
    };

    let resolved = resolve(&source_path, layout, claims)?;

    Ok(Job {
        id,
        origin: candidate.origin,
        source_path,
        archive_dir: resolved.archive_dir,
        archive_path: resolved.archive_path,
        converted_dir: resolved.converted_dir,
        output_path: resolved.output_path,
        temp_path: resolved.temp_path,
        state: JobState::Discovered,
    })
}

/// Builds jobs for all candidates in discovery order.
///
/// Candidates whose path cannot be resolved are logged and dropped.
pub fn plan_jobs(candidates: &[ScanCandidate], layout: &Layout) -> Vec<Job> {
    let mut claims = NameClaims::new();
    let mut jobs = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match build_job(jobs.len(), candidate, layout, &mut claims) {
            Ok(job) => jobs.push(job),
            Err(e) => warn!("skipping {}: {}", candidate.path.display(), e),
        }
    }

    jobs
}
