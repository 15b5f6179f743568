//! Conversion executor: runs the encoder for one job into its temp path.

use crate::encode::{EncodeError, EncodeSettings, Encoder};
use crate::job::Job;
use crate::progress::{format_clock, render_status, ProgressUpdate};
use crate::runlog::RunLog;
use indicatif::ProgressBar;
use std::fs;
use std::io;
use tokio_util::sync::CancellationToken;

/// How a conversion attempt ended.
#[derive(Debug)]
pub enum ConvertOutcome {
    /// Encoder exited cleanly; the temp output is complete.
    Success,
    /// Encoder failed; the temp output (if any) is garbage.
    Failed(EncodeError),
    /// The run was interrupted while this job was converting.
    Cancelled,
}

/// Creates the converted directory the temp output lands in.
pub fn prepare_output_dir(job: &Job) -> Result<(), EncodeError> {
    fs::create_dir_all(&job.converted_dir).map_err(|source| EncodeError::OutputDir {
        path: job.converted_dir.clone(),
        source,
    })
}

/// Removes a leftover temp output from an interrupted run.
pub fn remove_stale_temp(job: &Job) -> Result<(), EncodeError> {
    match fs::remove_file(&job.temp_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(EncodeError::StaleTemp {
            path: job.temp_path.clone(),
            source,
        }),
    }
}

/// Converts `job.archive_path` into `job.temp_path`.
///
/// Steps:
/// 1. Create the converted directory and delete a stale temp output
/// 2. Probe the input duration (failure only costs the percentage display)
/// 3. Run the encoder, rendering its progress on `line`
///
/// Cancellation wins over the encoder's exit status: a child killed because
/// the run was interrupted is reported as `Cancelled`, not as a failure.
pub async fn convert(
    job: &Job,
    encoder: &dyn Encoder,
    settings: &EncodeSettings,
    line: &ProgressBar,
    log: &RunLog,
    cancel: &CancellationToken,
) -> ConvertOutcome {
    if let Err(e) = prepare_output_dir(job).and_then(|()| remove_stale_temp(job)) {
        return ConvertOutcome::Failed(e);
    }

    let total = match encoder.probe_duration(job.input_path()).await {
        Ok(duration) => {
            log.info(format!("{}: duration {}", job.label(), format_clock(duration)));
            Some(duration)
        }
        Err(e) => {
            log.warn(format!("{}: could not read duration: {}", job.label(), e));
            None
        }
    };

    if cancel.is_cancelled() {
        return ConvertOutcome::Cancelled;
    }

    line.set_message("converting");
    let on_progress = |update: &ProgressUpdate| line.set_message(render_status(update, total));

    let result = encoder
        .run(
            job.input_path(),
            &job.temp_path,
            settings,
            &on_progress,
            cancel,
        )
        .await;

    match result {
        Ok(exit) if exit.is_success() => ConvertOutcome::Success,
        _ if cancel.is_cancelled() => ConvertOutcome::Cancelled,
        Ok(exit) => match exit.into_error() {
            Some(e) => ConvertOutcome::Failed(e),
            None => ConvertOutcome::Success,
        },
        Err(e) => ConvertOutcome::Failed(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::plan_jobs;
    use crate::paths::Layout;
    use crate::scan::{CandidateOrigin, ScanCandidate};
    use crate::test_support::{Behavior, FakeEncoder};
    use batch_mp4_config::{EncoderProfile, LoggingConfig};
    use std::path::Path;
    use tempfile::TempDir;

    fn archived_job(root: &Path, name: &str) -> Job {
        let original = root.join("original");
        fs::create_dir_all(&original).unwrap();
        fs::write(original.join(name), b"source bytes").unwrap();
        let candidate = ScanCandidate {
            path: original.join(name),
            origin: CandidateOrigin::Archived,
        };
        let job = plan_jobs(&[candidate], &Layout::default()).remove(0);
        fs::create_dir_all(&job.converted_dir).unwrap();
        job
    }

    fn settings() -> EncodeSettings {
        EncodeSettings {
            profile: EncoderProfile::software(),
            threads: None,
        }
    }

    #[tokio::test]
    async fn test_convert_success_writes_temp() {
        let temp_dir = TempDir::new().unwrap();
        let job = archived_job(temp_dir.path(), "a.mkv");
        let encoder = FakeEncoder::new();

        let outcome = convert(
            &job,
            &encoder,
            &settings(),
            &ProgressBar::hidden(),
            &RunLog::console_only(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, ConvertOutcome::Success));
        assert_eq!(fs::read(&job.temp_path).unwrap(), b"converted:a.mkv");
        assert!(!job.output_path.exists());
    }

    #[tokio::test]
    async fn test_convert_logs_source_duration() {
        let temp_dir = TempDir::new().unwrap();
        let job = archived_job(temp_dir.path(), "a.mkv");
        let logs = temp_dir.path().join("logs");
        fs::create_dir_all(&logs).unwrap();
        let cfg = LoggingConfig::default();
        let log = RunLog::open(&logs, &cfg).unwrap();

        convert(
            &job,
            &FakeEncoder::new(),
            &settings(),
            &ProgressBar::hidden(),
            &log,
            &CancellationToken::new(),
        )
        .await;
        drop(log);

        let all = fs::read_to_string(logs.join(&cfg.all_events)).unwrap();
        assert!(all.contains("INFO a.mkv: duration 00:00:10"), "log was: {}", all);
    }

    #[tokio::test]
    async fn test_convert_creates_output_dir() {
        let temp_dir = TempDir::new().unwrap();
        let job = archived_job(temp_dir.path(), "b.avi");
        fs::remove_dir(&job.converted_dir).unwrap();

        let outcome = convert(
            &job,
            &FakeEncoder::new(),
            &settings(),
            &ProgressBar::hidden(),
            &RunLog::console_only(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, ConvertOutcome::Success));
        assert!(job.temp_path.exists());
    }

    #[tokio::test]
    async fn test_convert_removes_stale_temp_first() {
        let temp_dir = TempDir::new().unwrap();
        let job = archived_job(temp_dir.path(), "a.mkv");
        fs::write(&job.temp_path, b"debris from a killed run").unwrap();
        let encoder = FakeEncoder::new().with("a.mkv", Behavior::Fail(1));

        let outcome = convert(
            &job,
            &encoder,
            &settings(),
            &ProgressBar::hidden(),
            &RunLog::console_only(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            outcome,
            ConvertOutcome::Failed(EncodeError::Failed { code: 1, .. })
        ));
        // only the fake's own partial write remains
        assert_eq!(fs::read(&job.temp_path).unwrap(), b"partial");
    }

    #[tokio::test]
    async fn test_convert_reports_cancellation() {
        let temp_dir = TempDir::new().unwrap();
        let job = archived_job(temp_dir.path(), "a.mkv");
        let encoder = FakeEncoder::new().with("a.mkv", Behavior::WaitForCancel);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let started = encoder.started();
        tokio::spawn(async move {
            started.notified().await;
            trigger.cancel();
        });

        let outcome = convert(
            &job,
            &encoder,
            &settings(),
            &ProgressBar::hidden(),
            &RunLog::console_only(),
            &cancel,
        )
        .await;

        assert!(matches!(outcome, ConvertOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_convert_skips_encoder_when_already_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let job = archived_job(temp_dir.path(), "a.mkv");
        let encoder = FakeEncoder::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = convert(
            &job,
            &encoder,
            &settings(),
            &ProgressBar::hidden(),
            &RunLog::console_only(),
            &cancel,
        )
        .await;

        assert!(matches!(outcome, ConvertOutcome::Cancelled));
        assert_eq!(encoder.runs(), 0);
    }
}
