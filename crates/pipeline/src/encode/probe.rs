//! ffprobe wrapper for reading a file's duration.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe ran but reported failure.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// IO error while running ffprobe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Builds `ffprobe -v quiet -print_format json -show_format <input>`.
pub fn build_probe_command(program: &str, input: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(input)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Runs ffprobe on `input` and returns the container duration.
pub async fn probe_duration(program: &str, input: &Path) -> Result<Duration, ProbeError> {
    let output = build_probe_command(program, input).output().await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    parse_duration_output(&String::from_utf8_lossy(&output.stdout))
}

/// Extracts `format.duration` (seconds, as a string) from ffprobe JSON.
pub fn parse_duration_output(json_str: &str) -> Result<Duration, ProbeError> {
    let parsed: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| ProbeError::ParseError("Missing format duration".to_string()))?;

    let secs: f64 = duration
        .trim()
        .parse()
        .map_err(|_| ProbeError::ParseError(format!("Invalid duration: {}", duration)))?;

    Duration::try_from_secs_f64(secs)
        .map_err(|_| ProbeError::ParseError(format!("Invalid duration: {}", duration)))
}
