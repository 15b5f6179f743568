//! Encoder capability used by the conversion executor.
//!
//! The pipeline only talks to an [`Encoder`]; how the media work actually
//! happens (ffmpeg subprocesses in production, a scripted fake in tests) stays
//! behind this trait.

pub mod ffmpeg;
pub mod probe;

pub use ffmpeg::{build_ffmpeg_command, FfmpegEncoder};
pub use probe::{build_probe_command, parse_duration_output, ProbeError};

use crate::progress::ProgressUpdate;
use async_trait::async_trait;
use batch_mp4_config::EncoderProfile;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Callback receiving progress snapshots while an encode runs.
pub type ProgressFn<'a> = &'a (dyn Fn(&ProgressUpdate) + Send + Sync);

/// Encoder could not be started at all.
#[derive(Debug, Error)]
#[error("failed to start {program}: {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: io::Error,
}

/// Error type for conversion operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder exited with a non-zero status
    #[error("encoder failed with exit code {code}{}", detail_suffix(.detail))]
    Failed { code: i32, detail: Option<String> },

    /// Encoder was killed by a signal
    #[error("encoder was terminated by a signal{}", detail_suffix(.detail))]
    Terminated { detail: Option<String> },

    /// Encoder could not be launched
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Output directory could not be created
    #[error("failed to create output directory {}: {source}", .path.display())]
    OutputDir { path: PathBuf, source: io::Error },

    /// Leftover temp output from an earlier run could not be removed
    #[error("failed to remove stale temp file {}: {source}", .path.display())]
    StaleTemp { path: PathBuf, source: io::Error },
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {}", d),
        None => String::new(),
    }
}

/// How an encoder process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderExit {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// Last diagnostic line the encoder printed, if any
    pub detail: Option<String>,
}

impl EncoderExit {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            detail: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Converts a failed exit into an [`EncodeError`]; `None` on success.
    pub fn into_error(self) -> Option<EncodeError> {
        match self.code {
            Some(0) => None,
            Some(code) => Some(EncodeError::Failed {
                code,
                detail: self.detail,
            }),
            None => Some(EncodeError::Terminated {
                detail: self.detail,
            }),
        }
    }
}

/// Per-run encoding settings shared by every job.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub profile: EncoderProfile,
    /// Thread cap per encode; `None` lets the encoder decide
    pub threads: Option<u32>,
}

/// Something that can turn one video file into an MP4.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encodes `input` into `output`.
    ///
    /// Returns how the encoder exited. When `cancel` fires the encoder is
    /// stopped and the returned exit reflects that; the caller decides what
    /// cancellation means for the job.
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        settings: &EncodeSettings,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<EncoderExit, SpawnError>;

    /// Duration of the media in `input`, used to show a percentage.
    async fn probe_duration(&self, input: &Path) -> Result<Duration, ProbeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_success_has_no_error() {
        assert!(EncoderExit::success().is_success());
        assert!(EncoderExit::success().into_error().is_none());
    }

    #[test]
    fn test_exit_code_maps_to_failed() {
        let exit = EncoderExit {
            code: Some(187),
            detail: Some("Conversion failed!".to_string()),
        };
        let err = exit.into_error().unwrap();
        assert!(matches!(err, EncodeError::Failed { code: 187, .. }));
        assert_eq!(
            err.to_string(),
            "encoder failed with exit code 187: Conversion failed!"
        );
    }

    #[test]
    fn test_signal_maps_to_terminated() {
        let exit = EncoderExit {
            code: None,
            detail: None,
        };
        let err = exit.into_error().unwrap();
        assert!(matches!(err, EncodeError::Terminated { .. }));
        assert_eq!(err.to_string(), "encoder was terminated by a signal");
    }
}
