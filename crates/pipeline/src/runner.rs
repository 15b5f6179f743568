//! Run orchestration for batch-mp4
//!
//! One run is: scan the roots once, plan every job (claiming all output
//! names up front), then dispatch the jobs in discovery order onto a bounded
//! pool. An interrupt stops dispatch, lets running jobs roll themselves back
//! within a grace period, and rolls back whatever is left afterwards.

use crate::concurrency::ConcurrencyPlan;
use crate::encode::{EncodeSettings, Encoder, FfmpegEncoder};
use crate::executor::{JobExecutor, JobOutcome, JobReport, RunSummary};
use crate::job::{plan_jobs, Job};
use crate::paths::Layout;
use crate::progress::ProgressBoard;
use crate::runlog::{LogOpenError, RunLog};
use crate::scan::{scan_roots, ScanOptions};
use crate::startup::{run_startup_checks, StartupError};
use batch_mp4_config::{Config, ConfigError};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Process exit code for a run stopped by an interrupt (128 + SIGINT)
pub const EXIT_INTERRUPTED: u8 = 130;

/// Error type for whole-run failures
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Log files could not be opened
    #[error(transparent)]
    Log(#[from] LogOpenError),
}

/// Runner state for one invocation
pub struct Runner {
    /// Configuration after file, environment and CLI overrides
    config: Config,
    /// Derived concurrency plan
    concurrency_plan: ConcurrencyPlan,
    encoder: Arc<dyn Encoder>,
    progress: ProgressBoard,
}

impl Runner {
    /// Initialize a runner that converts with ffmpeg
    ///
    /// This performs the startup sequence:
    /// 1. Run startup checks (ffmpeg, ffprobe, codec support)
    /// 2. Derive concurrency plan
    /// 3. Set up the ffmpeg encoder
    ///
    /// Progress stays hidden until a board is attached with
    /// [`Runner::with_progress`].
    pub fn new(config: Config) -> Result<Self, RunnerError> {
        run_startup_checks(&config.tools, config.encoder.active_profile())?;

        let encoder = Arc::new(FfmpegEncoder::new(&config.tools));
        Ok(Self::with_encoder(config, encoder))
    }

    /// Initialize a runner around an existing encoder without startup checks
    ///
    /// Useful for testing when ffmpeg is not available. Progress is hidden.
    pub fn with_encoder(config: Config, encoder: Arc<dyn Encoder>) -> Self {
        let concurrency_plan = ConcurrencyPlan::derive(&config);
        Self {
            config,
            concurrency_plan,
            encoder,
            progress: ProgressBoard::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBoard) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn concurrency_plan(&self) -> &ConcurrencyPlan {
        &self.concurrency_plan
    }

    fn layout(&self) -> Layout {
        Layout::from_config(&self.config.layout)
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.config.jobs.shutdown_grace_secs)
    }

    /// Scans `roots` once and builds every job in discovery order.
    ///
    /// Touches nothing on disk.
    pub fn plan(&self, roots: &[PathBuf]) -> Vec<Job> {
        let layout = self.layout();
        let options = ScanOptions::new(&self.config.scan, layout.clone());
        let candidates = scan_roots(roots, &options);
        plan_jobs(&candidates, &layout)
    }

    /// Writes `source → output` for every planned job to `out`.
    ///
    /// Returns the number of jobs listed.
    pub fn dry_run<W: Write>(&self, roots: &[PathBuf], out: &mut W) -> io::Result<usize> {
        let jobs = self.plan(roots);
        for job in &jobs {
            writeln!(out, "{}", job)?;
        }
        Ok(jobs.len())
    }

    /// Converts everything under `roots`.
    ///
    /// Per-job failures end up in the summary, never as an error. When
    /// `cancel` fires, dispatch stops, running jobs get the configured grace
    /// period to roll themselves back, and anything still registered after
    /// that is rolled back here.
    pub async fn run(
        &self,
        roots: &[PathBuf],
        log: Arc<RunLog>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let jobs = self.plan(roots);
        let mut summary = RunSummary::default();

        if jobs.is_empty() {
            log.info("Nothing to convert");
            summary.interrupted = cancel.is_cancelled();
            return summary;
        }

        if self.concurrency_plan.is_serial() {
            log.info(format!("Converting {} file(s) one at a time", jobs.len()));
        } else {
            log.info(format!(
                "Converting {} file(s), up to {} at a time",
                jobs.len(),
                self.concurrency_plan.max_concurrent_jobs
            ));
        }

        let executor = Arc::new(JobExecutor::new(
            &self.concurrency_plan,
            Arc::clone(&self.encoder),
            EncodeSettings {
                profile: self.config.encoder.active_profile().clone(),
                threads: None,
            },
            Arc::clone(&log),
            self.progress.clone(),
            cancel.clone(),
        ));

        let mut tasks = JoinSet::new();
        let mut pending = jobs.into_iter();

        // Dispatch in discovery order; stop at the first interrupt
        while let Some(job) = pending.next() {
            let Some(permit) = executor.acquire_permit().await else {
                summary.record(&JobOutcome::NotStarted);
                break;
            };
            let exec = Arc::clone(&executor);
            tasks.spawn(async move {
                let _permit = permit;
                exec.execute(job).await
            });
        }
        for _ in pending {
            summary.record(&JobOutcome::NotStarted);
        }

        self.collect(&mut tasks, &mut summary, &log, &cancel).await;

        // Records left behind belong to jobs that were aborted or panicked
        let leftover = executor.in_flight();
        if !leftover.is_empty() {
            log.warn(format!("Rolling back {} unfinished job(s)", leftover.len()));
        }
        for record in leftover.drain() {
            match record.rollback() {
                Ok(()) => {
                    log.warn(format!(
                        "{}: rolled back after shutdown",
                        record.source_path.display()
                    ));
                    summary.record(&JobOutcome::RolledBack);
                }
                Err(e) => {
                    log.error(format!(
                        "{}: rollback failed: {}",
                        record.source_path.display(),
                        e
                    ));
                    summary.record(&JobOutcome::RollbackFailed(e.to_string()));
                }
            }
        }

        summary.interrupted = cancel.is_cancelled();
        if summary.interrupted {
            log.warn(format!("Interrupted: {}", summary));
        } else {
            log.info(format!("Finished: {}", summary));
        }
        summary
    }

    /// Joins every task, switching to the shutdown deadline once `cancel`
    /// fires. Tasks still running at the deadline are aborted.
    async fn collect(
        &self,
        tasks: &mut JoinSet<JobReport>,
        summary: &mut RunSummary,
        log: &RunLog,
        cancel: &CancellationToken,
    ) {
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => record_joined(joined, summary, log),
                    None => return,
                },
                _ = cancel.cancelled() => break,
            }
        }

        log.warn(format!(
            "Interrupt received; stopping encoders and rolling back ({} running)",
            tasks.len()
        ));

        let deadline = Instant::now() + self.shutdown_grace();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => record_joined(joined, summary, log),
                Ok(None) => return,
                Err(_) => {
                    log.warn(format!(
                        "Shutdown grace elapsed; aborting {} job(s)",
                        tasks.len()
                    ));
                    tasks.abort_all();
                    while let Some(joined) = tasks.join_next().await {
                        // aborted jobs are settled through their rollback records
                        if let Ok(report) = joined {
                            summary.record(&report.outcome);
                        }
                    }
                    return;
                }
            }
        }
    }
}

fn record_joined(
    joined: Result<JobReport, JoinError>,
    summary: &mut RunSummary,
    log: &RunLog,
) {
    match joined {
        Ok(report) => summary.record(&report.outcome),
        Err(e) if e.is_panic() => {
            log.error(format!("Job task panicked: {}", e));
            summary.record(&JobOutcome::EncodeFailed(e.to_string()));
        }
        Err(_) => {}
    }
}
