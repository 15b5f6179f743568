//! ffmpeg-backed encoder.
//!
//! Builds the ffmpeg command line from an [`EncoderProfile`] and supervises
//! the child: progress is read from `-progress pipe:1` on stdout, the last
//! stderr line is kept as the failure detail, and the child is killed when
//! the run is cancelled. The child runs in its own process group so a
//! terminal Ctrl-C reaches only batch-mp4, which then stops it.
//!
//! [`EncoderProfile`]: batch_mp4_config::EncoderProfile

use super::{probe, EncodeSettings, Encoder, EncoderExit, ProbeError, ProgressFn, SpawnError};
use crate::progress::ProgressParser;
use async_trait::async_trait;
use batch_mp4_config::ToolsConfig;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Encoder that shells out to `ffmpeg` and `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegEncoder {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
            ffprobe: tools.ffprobe.clone(),
        }
    }
}

/// Build an ffmpeg command converting `input` into an MP4 at `output`
///
/// Creates a Command configured with:
/// - Quiet, non-interactive output with machine-readable progress on stdout
/// - Video codec plus CRF (or bitrate), preset and pixel format from the profile
/// - Thread cap when several encodes share the machine
/// - Audio codec and bitrate from the profile
/// - Profile extra args, then `+faststart` and an explicit `mp4` muxer
///
/// The explicit muxer matters because the temp output's `.temp.mp4` name is
/// not what ffmpeg would otherwise guess from.
pub fn build_ffmpeg_command(
    program: &str,
    input: &Path,
    output: &Path,
    settings: &EncodeSettings,
) -> Command {
    let profile = &settings.profile;
    let mut cmd = Command::new(program);

    cmd.args(["-hide_banner", "-nostdin", "-y"]);
    cmd.args(["-loglevel", "error", "-nostats", "-progress", "pipe:1"]);
    cmd.arg("-i").arg(input);

    cmd.arg("-c:v").arg(&profile.video_codec);
    if let Some(preset) = &profile.preset {
        cmd.arg("-preset").arg(preset);
    }
    match (profile.crf, &profile.video_bitrate) {
        (Some(crf), _) => {
            cmd.arg("-crf").arg(crf.to_string());
        }
        (None, Some(bitrate)) => {
            cmd.arg("-b:v").arg(bitrate);
        }
        (None, None) => {}
    }
    if let Some(pix_fmt) = &profile.pixel_format {
        cmd.arg("-pix_fmt").arg(pix_fmt);
    }
    if let Some(threads) = settings.threads {
        cmd.arg("-threads").arg(threads.to_string());
    }

    cmd.arg("-c:a").arg(&profile.audio_codec);
    if let Some(bitrate) = &profile.audio_bitrate {
        cmd.arg("-b:a").arg(bitrate);
    }

    cmd.args(&profile.extra_args);

    cmd.args(["-movflags", "+faststart", "-f", "mp4"]);
    cmd.arg(output);

    cmd
}

/// Runs `cmd` to completion, forwarding progress and honouring `cancel`.
pub(crate) async fn supervise(
    mut cmd: Command,
    program: &str,
    on_progress: ProgressFn<'_>,
    cancel: &CancellationToken,
) -> Result<EncoderExit, SpawnError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    isolate_from_terminal(&mut cmd);

    let spawn_error = |source| SpawnError {
        program: program.to_string(),
        source,
    };

    let mut child = cmd.spawn().map_err(spawn_error)?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stderr_task = tokio::spawn(async move {
        let mut last_line = None;
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if !line.is_empty() {
                    debug!(target: "encoder", "{}", line);
                    last_line = Some(line);
                }
            }
        }
        last_line
    });

    let pump = async move {
        if let Some(stdout) = stdout {
            let mut parser = ProgressParser::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(update) = parser.feed(&line) {
                    on_progress(&update);
                }
            }
        }
    };
    tokio::pin!(pump);
    let mut pump_done = false;

    let status = loop {
        tokio::select! {
            _ = &mut pump, if !pump_done => pump_done = true,
            status = child.wait() => break status,
            _ = cancel.cancelled() => {
                debug!(program = %program, "cancelled, killing encoder");
                // the child may already have exited on its own
                let _ = child.start_kill();
                break child.wait().await;
            }
        }
    }
    .map_err(spawn_error)?;

    // the child is gone; whatever is still buffered in the pipes is finite
    if !pump_done {
        let _ = tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut pump).await;
    }
    let detail = tokio::time::timeout(PIPE_DRAIN_TIMEOUT, stderr_task)
        .await
        .ok()
        .and_then(|joined| joined.ok())
        .flatten();

    Ok(EncoderExit {
        code: status.code(),
        detail,
    })
}

/// Starts the child in a new process group so terminal signals skip it.
fn isolate_from_terminal(cmd: &mut Command) {
    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        settings: &EncodeSettings,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<EncoderExit, SpawnError> {
        let cmd = build_ffmpeg_command(&self.ffmpeg, input, output, settings);
        supervise(cmd, &self.ffmpeg, on_progress, cancel).await
    }

    async fn probe_duration(&self, input: &Path) -> Result<Duration, ProbeError> {
        probe::probe_duration(&self.ffprobe, input).await
    }
}
