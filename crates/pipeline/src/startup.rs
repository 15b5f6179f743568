//! Startup checks module for batch-mp4
//!
//! Provides preflight checks run before any file is touched:
//! - ffmpeg and ffprobe are installed and runnable
//! - the configured video codec is one this ffmpeg build can encode with

use batch_mp4_config::{EncoderProfile, ToolsConfig};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {reason}")]
    MissingTool { tool: String, reason: String },

    #[error("encoder '{codec}' is not supported by {tool}")]
    MissingEncoder { tool: String, codec: String },
}

/// Check that `program` runs and exits successfully with `version_arg`
///
/// Returns the program's stdout so callers can log the version.
pub fn check_tool_available(program: &str, version_arg: &str) -> Result<String, StartupError> {
    let output = Command::new(program)
        .arg(version_arg)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| StartupError::MissingTool {
            tool: program.to_string(),
            reason: format!("{} {} failed; is it installed and in PATH? Error: {}", program, version_arg, e),
        })?;

    if !output.status.success() {
        return Err(StartupError::MissingTool {
            tool: program.to_string(),
            reason: format!("{} {} exited with {}", program, version_arg, output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 8.0 ..."
/// - N-prefixed: "ffmpeg version n8.0-... ..."
/// - Also "ffprobe version ..." lines
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    // Look for "<tool> version" followed by the version string
    let version_line = version_output
        .lines()
        .map(|line| line.to_lowercase())
        .find(|line| line.contains(" version "))?;

    // Extract the version part after "version"
    let version_part = version_line
        .split(" version ")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    // Handle n-prefixed versions (e.g., "n8.0-...")
    let version_str = version_part.trim_start_matches('n');

    // Extract major version (before first '.' or '-')
    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Checks whether an `ffmpeg -encoders` listing contains `codec`.
///
/// Listing lines look like ` V....D libx264  libx264 H.264 / AVC ...`: a
/// flags column followed by the encoder name.
pub fn encoder_listed(encoders_output: &str, codec: &str) -> bool {
    encoders_output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let flags = columns.next()?;
            let name = columns.next()?;
            // legend rows read ` V..... = Video`
            (flags.len() == 6 && name != "=").then_some(name)
        })
        .any(|name| name == codec)
}

/// Check that `ffmpeg` can encode with the profile's video codec
///
/// Only a listing that was produced and lacks the codec is an error; if the
/// listing itself cannot be obtained the encode will report the problem.
pub fn check_encoder_supported(ffmpeg: &str, profile: &EncoderProfile) -> Result<(), StartupError> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output();

    let listing = match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout).into_owned(),
        Ok(output) => {
            debug!("{} -encoders exited with {}", ffmpeg, output.status);
            return Ok(());
        }
        Err(e) => {
            debug!("{} -encoders failed: {}", ffmpeg, e);
            return Ok(());
        }
    };

    if encoder_listed(&listing, &profile.video_codec) {
        Ok(())
    } else {
        Err(StartupError::MissingEncoder {
            tool: ffmpeg.to_string(),
            codec: profile.video_codec.clone(),
        })
    }
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. ffmpeg availability
/// 2. ffprobe availability
/// 3. Video codec support
pub fn run_startup_checks(tools: &ToolsConfig, profile: &EncoderProfile) -> Result<(), StartupError> {
    let ffmpeg_version = check_tool_available(&tools.ffmpeg, "-version")?;
    check_tool_available(&tools.ffprobe, "-version")?;

    match parse_ffmpeg_version(&ffmpeg_version) {
        Some(major) => info!("Using {} (major version {})", tools.ffmpeg, major),
        None => info!("Using {} (version unknown)", tools.ffmpeg),
    }

    check_encoder_supported(&tools.ffmpeg, profile)
}
