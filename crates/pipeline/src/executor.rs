//! Job executor module for batch-mp4
//!
//! Runs one job through archive, convert and publish, with concurrency
//! limited by a semaphore and every filesystem change registered for
//! rollback until the job settles.

use crate::archive::{archive, ArchiveOutcome};
use crate::concurrency::ConcurrencyPlan;
use crate::convert::{convert, ConvertOutcome};
use crate::encode::{EncodeSettings, Encoder};
use crate::job::{Job, JobState};
use crate::progress::ProgressBoard;
use crate::publish::{discard_temp, publish, InFlight, RollbackRecord};
use crate::runlog::RunLog;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Final result of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Output renamed into place
    Published,
    /// Nothing to do, with the reason
    Skipped(String),
    /// Source could not be archived; nothing was changed
    ArchiveFailed(String),
    /// Encoder failed; the archived source stays for a retry
    EncodeFailed(String),
    /// Encode succeeded but the output could not be put in place
    PublishFailed(String),
    /// Interrupted and restored
    RolledBack,
    /// Interrupted and the restore itself failed
    RollbackFailed(String),
    /// Interrupted before the job was dispatched
    NotStarted,
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobOutcome::ArchiveFailed(_)
                | JobOutcome::EncodeFailed(_)
                | JobOutcome::PublishFailed(_)
                | JobOutcome::RollbackFailed(_)
        )
    }
}

/// A job together with how it ended.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: Job,
    pub outcome: JobOutcome,
}

/// Tally printed at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub not_started: usize,
    /// The run was cut short by an interrupt
    pub interrupted: bool,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Published => self.published += 1,
            JobOutcome::Skipped(_) => self.skipped += 1,
            JobOutcome::RolledBack => self.rolled_back += 1,
            JobOutcome::NotStarted => self.not_started += 1,
            JobOutcome::ArchiveFailed(_)
            | JobOutcome::EncodeFailed(_)
            | JobOutcome::PublishFailed(_)
            | JobOutcome::RollbackFailed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.published + self.skipped + self.failed + self.rolled_back + self.not_started
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} published, {} failed, {} skipped, {} rolled back",
            self.published, self.failed, self.skipped, self.rolled_back
        )?;
        if self.not_started > 0 {
            write!(f, ", {} not started", self.not_started)?;
        }
        Ok(())
    }
}

/// Job executor that runs conversion jobs with concurrency limiting
///
/// Uses a tokio Semaphore to limit the number of concurrent jobs according
/// to the concurrency plan.
pub struct JobExecutor {
    /// Semaphore for limiting concurrent jobs
    semaphore: Arc<Semaphore>,
    encoder: Arc<dyn Encoder>,
    settings: EncodeSettings,
    log: Arc<RunLog>,
    progress: ProgressBoard,
    /// Rollback records of jobs that have touched the filesystem
    in_flight: Arc<InFlight>,
    cancel: CancellationToken,
}

impl JobExecutor {
    /// Create a new JobExecutor
    ///
    /// # Arguments
    /// * `plan` - Concurrency plan determining pool size and encoder threads
    /// * `encoder` - Encoder every job runs through
    /// * `profile_settings` - Encoding settings without the thread cap
    /// * `log` - Run log receiving every job event
    /// * `progress` - Console board for per-job status lines
    /// * `cancel` - Run-wide interrupt token
    pub fn new(
        plan: &ConcurrencyPlan,
        encoder: Arc<dyn Encoder>,
        profile_settings: EncodeSettings,
        log: Arc<RunLog>,
        progress: ProgressBoard,
        cancel: CancellationToken,
    ) -> Self {
        let permits = plan.max_concurrent_jobs.max(1) as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            encoder,
            settings: EncodeSettings {
                threads: plan.threads_per_job,
                ..profile_settings
            },
            log,
            progress,
            in_flight: Arc::new(InFlight::new()),
            cancel,
        }
    }

    /// Get the number of available permits (slots for concurrent jobs)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquire a permit for job execution
    ///
    /// Waits until a slot is free. Returns `None` once the run is
    /// interrupted, so no new job starts after an interrupt.
    pub async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        }
    }

    /// Registry of jobs that would need a rollback right now
    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    /// Execute a job through the conversion pipeline
    ///
    /// This method implements the full pipeline:
    /// 1. Skips the job if its output already exists
    /// 2. Archives the source and registers a rollback record
    /// 3. Converts the archived source into the temp output
    /// 4. Publishes on success; discards the temp output on failure; rolls
    ///    back on interrupt
    ///
    /// The caller holds a permit from [`JobExecutor::acquire_permit`] for the
    /// duration of the call. Per-job failures are logged and reported, never
    /// propagated.
    pub async fn execute(&self, mut job: Job) -> JobReport {
        if self.cancel.is_cancelled() {
            return finish(job, JobOutcome::NotStarted);
        }

        if job.output_path.exists() {
            let reason = format!("{} already exists", job.output_path.display());
            self.log.info(format!("{}: skipped, {}", job.label(), reason));
            return finish(job, JobOutcome::Skipped(reason));
        }

        // Archive
        job.state = JobState::Archiving;
        let restore_source = match archive(&job) {
            Ok(ArchiveOutcome::Moved) => {
                self.log.info(format!(
                    "{}: archived to {}",
                    job.label(),
                    job.archive_path.display()
                ));
                true
            }
            Ok(ArchiveOutcome::AlreadyArchived) => {
                self.log
                    .info(format!("{}: retrying archived source", job.label()));
                false
            }
            Err(e) => {
                let message = e.to_string();
                self.log.error(format!("{}: archive failed: {}", job.label(), message));
                job.state = JobState::Failed(message.clone());
                return finish(job, JobOutcome::ArchiveFailed(message));
            }
        };
        self.in_flight
            .register(RollbackRecord::for_job(&job, restore_source));
        job.state = JobState::Archived;

        // Convert
        let line = self.progress.job_line(&job);
        job.state = JobState::Converting;
        let converted = convert(
            &job,
            self.encoder.as_ref(),
            &self.settings,
            &line,
            &self.log,
            &self.cancel,
        )
        .await;
        line.finish_and_clear();

        // Whoever takes the record settles the job; a missing record means
        // the runner already rolled it back.
        let Some(record) = self.in_flight.take(job.id) else {
            job.state = JobState::RolledBack;
            return finish(job, JobOutcome::RolledBack);
        };

        let outcome = match converted {
            ConvertOutcome::Success => self.publish_job(&mut job),
            ConvertOutcome::Failed(e) => {
                let message = e.to_string();
                self.discard(&job);
                self.log.error(format!(
                    "{}: conversion failed: {}; source kept at {}",
                    job.label(),
                    message,
                    job.archive_path.display()
                ));
                job.state = JobState::Failed(message.clone());
                JobOutcome::EncodeFailed(message)
            }
            ConvertOutcome::Cancelled => match record.rollback() {
                Ok(()) => {
                    self.log
                        .warn(format!("{}: interrupted, rolled back", job.label()));
                    job.state = JobState::RolledBack;
                    JobOutcome::RolledBack
                }
                Err(e) => {
                    let message = e.to_string();
                    self.log
                        .error(format!("{}: rollback failed: {}", job.label(), message));
                    job.state = JobState::Failed(message.clone());
                    JobOutcome::RollbackFailed(message)
                }
            },
        };

        finish(job, outcome)
    }

    fn publish_job(&self, job: &mut Job) -> JobOutcome {
        match publish(job) {
            Ok(()) => {
                self.log.info(format!(
                    "{}: published {}",
                    job.label(),
                    job.output_path.display()
                ));
                job.state = JobState::Published;
                JobOutcome::Published
            }
            Err(e) => {
                let message = e.to_string();
                self.discard(job);
                self.log.error(format!(
                    "{}: publish failed: {}; source kept at {}",
                    job.label(),
                    message,
                    job.archive_path.display()
                ));
                job.state = JobState::Failed(message.clone());
                JobOutcome::PublishFailed(message)
            }
        }
    }

    fn discard(&self, job: &Job) {
        if let Err(e) = discard_temp(&job.temp_path) {
            self.log.error(format!(
                "{}: could not delete {}: {}",
                job.label(),
                job.temp_path.display(),
                e
            ));
        }
    }
}

fn finish(job: Job, outcome: JobOutcome) -> JobReport {
    JobReport { job, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::plan_jobs;
    use crate::paths::Layout;
    use crate::scan::{CandidateOrigin, ScanCandidate};
    use crate::test_support::{Behavior, FakeEncoder};
    use batch_mp4_config::EncoderProfile;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn executor(encoder: Arc<dyn Encoder>, jobs: u32, cancel: CancellationToken) -> JobExecutor {
        JobExecutor::new(
            &ConcurrencyPlan::derive_with_cores(jobs, 8),
            encoder,
            EncodeSettings {
                profile: EncoderProfile::software(),
                threads: None,
            },
            Arc::new(RunLog::console_only()),
            ProgressBoard::hidden(),
            cancel,
        )
    }

    fn fresh_job(root: &Path, name: &str) -> Job {
        let source = root.join(name);
        fs::write(&source, format!("source:{}", name)).unwrap();
        let candidate = ScanCandidate {
            path: source,
            origin: CandidateOrigin::Fresh,
        };
        plan_jobs(&[candidate], &Layout::default()).remove(0)
    }

    #[test]
    fn test_executor_permits_and_threads() {
        let exec = executor(Arc::new(FakeEncoder::new()), 2, CancellationToken::new());
        assert_eq!(exec.available_permits(), 2);
        assert_eq!(exec.settings().threads, Some(4));
    }

    #[tokio::test]
    async fn test_execute_publishes() {
        let temp_dir = TempDir::new().unwrap();
        let job = fresh_job(temp_dir.path(), "a.mkv");
        let exec = executor(Arc::new(FakeEncoder::new()), 1, CancellationToken::new());

        let report = exec.execute(job).await;

        assert_eq!(report.outcome, JobOutcome::Published);
        assert_eq!(report.job.state, JobState::Published);
        assert!(!report.job.source_path.exists());
        assert!(report.job.archive_path.exists());
        assert_eq!(fs::read(&report.job.output_path).unwrap(), b"converted:a.mkv");
        assert!(!report.job.temp_path.exists());
        assert!(exec.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_execute_encode_failure_keeps_archive() {
        let temp_dir = TempDir::new().unwrap();
        let job = fresh_job(temp_dir.path(), "a.mkv");
        let encoder = FakeEncoder::new().with("a.mkv", Behavior::Fail(1));
        let exec = executor(Arc::new(encoder), 1, CancellationToken::new());

        let report = exec.execute(job).await;

        assert!(matches!(report.outcome, JobOutcome::EncodeFailed(_)));
        assert!(report.outcome.is_failure());
        assert!(report.job.archive_path.exists());
        assert!(!report.job.temp_path.exists(), "partial output must be discarded");
        assert!(!report.job.output_path.exists());
        assert!(exec.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_execute_skips_existing_output() {
        let temp_dir = TempDir::new().unwrap();
        let job = fresh_job(temp_dir.path(), "a.mkv");
        fs::create_dir_all(&job.converted_dir).unwrap();
        fs::write(&job.output_path, b"already there").unwrap();
        let encoder = Arc::new(FakeEncoder::new());
        let exec = executor(encoder.clone(), 1, CancellationToken::new());

        let report = exec.execute(job).await;

        assert!(matches!(report.outcome, JobOutcome::Skipped(_)));
        assert!(report.job.source_path.exists(), "skipped source is untouched");
        assert_eq!(encoder.runs(), 0);
    }

    #[tokio::test]
    async fn test_execute_archive_failure_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let job = fresh_job(temp_dir.path(), "a.mkv");
        fs::create_dir_all(&job.archive_dir).unwrap();
        fs::write(&job.archive_path, b"older file").unwrap();
        let encoder = Arc::new(FakeEncoder::new());
        let exec = executor(encoder.clone(), 1, CancellationToken::new());

        let report = exec.execute(job).await;

        assert!(matches!(report.outcome, JobOutcome::ArchiveFailed(_)));
        assert!(report.job.source_path.exists());
        assert_eq!(fs::read(&report.job.archive_path).unwrap(), b"older file");
        assert_eq!(encoder.runs(), 0);
    }

    #[tokio::test]
    async fn test_execute_interrupt_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let job = fresh_job(temp_dir.path(), "a.mkv");
        let encoder = Arc::new(FakeEncoder::new().with("a.mkv", Behavior::WaitForCancel));
        let cancel = CancellationToken::new();
        let exec = executor(encoder.clone(), 1, cancel.clone());

        let started = encoder.started();
        tokio::spawn(async move {
            started.notified().await;
            cancel.cancel();
        });

        let report = exec.execute(job).await;

        assert_eq!(report.outcome, JobOutcome::RolledBack);
        assert_eq!(fs::read(&report.job.source_path).unwrap(), b"source:a.mkv");
        assert!(!report.job.archive_path.exists());
        assert!(!report.job.temp_path.exists());
        assert!(exec.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_execute_after_cancel_does_not_start() {
        let temp_dir = TempDir::new().unwrap();
        let job = fresh_job(temp_dir.path(), "a.mkv");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let exec = executor(Arc::new(FakeEncoder::new()), 1, cancel);

        let report = exec.execute(job).await;

        assert_eq!(report.outcome, JobOutcome::NotStarted);
        assert!(report.job.source_path.exists());
    }

    #[tokio::test]
    async fn test_acquire_permit_respects_limit_and_cancel() {
        let cancel = CancellationToken::new();
        let exec = executor(Arc::new(FakeEncoder::new()), 1, cancel.clone());

        let held = exec.acquire_permit().await.unwrap();
        assert_eq!(exec.available_permits(), 0);
        drop(held);
        assert_eq!(exec.available_permits(), 1);

        cancel.cancel();
        assert!(exec.acquire_permit().await.is_none());
    }

    #[test]
    fn test_summary_tally() {
        let mut summary = RunSummary::default();
        for outcome in [
            JobOutcome::Published,
            JobOutcome::Published,
            JobOutcome::EncodeFailed("x".to_string()),
            JobOutcome::ArchiveFailed("y".to_string()),
            JobOutcome::Skipped("z".to_string()),
            JobOutcome::RolledBack,
        ] {
            summary.record(&outcome);
        }

        assert_eq!(summary.published, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.total(), 6);
        assert_eq!(
            summary.to_string(),
            "2 published, 2 failed, 1 skipped, 1 rolled back"
        );
    }
}
