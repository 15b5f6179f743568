//! Progress parsing and console status lines.
//!
//! ffmpeg is run with `-progress pipe:1`, which prints blocks of `key=value`
//! lines terminated by a `progress=continue` or `progress=end` line. The
//! parser folds each block into a [`ProgressUpdate`]; the board renders one
//! spinner line per running job.

use crate::job::Job;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const STATUS_TEMPLATE: &str = "{spinner} {prefix:.bold} {wide_msg}";
const TICK_INTERVAL: Duration = Duration::from_millis(120);

/// One snapshot of encoder progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub frame: Option<u64>,
    pub fps: Option<f32>,
    /// Position in the output stream
    pub out_time: Option<Duration>,
    /// Encoding speed relative to real time
    pub speed: Option<f32>,
    /// Set on the final block (`progress=end`)
    pub done: bool,
}

impl ProgressUpdate {
    /// Fraction of `total` covered so far, clamped to `0.0..=1.0`.
    pub fn fraction_of(&self, total: Duration) -> Option<f64> {
        let out_time = self.out_time?;
        if total.is_zero() {
            return None;
        }
        Some((out_time.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0))
    }
}

/// Incremental parser for ffmpeg's `-progress` stream.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: ProgressUpdate,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line; returns a snapshot when the line closes a block.
    ///
    /// Unknown keys and `N/A` values are ignored.
    pub fn feed(&mut self, line: &str) -> Option<ProgressUpdate> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key.trim() {
            "frame" => self.current.frame = value.parse().ok(),
            "fps" => self.current.fps = value.parse().ok(),
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time = Some(Duration::from_micros(us.max(0) as u64));
                }
            }
            "out_time" => {
                // out_time_us is authoritative when present
                if self.current.out_time.is_none() {
                    self.current.out_time = parse_clock(value);
                }
            }
            "speed" => self.current.speed = value.trim_end_matches('x').trim().parse().ok(),
            "progress" => {
                let mut update = std::mem::take(&mut self.current);
                update.done = value == "end";
                return Some(update);
            }
            _ => {}
        }
        None
    }
}

/// Parses `HH:MM:SS.ffffff` into a duration.
pub fn parse_clock(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.starts_with('-') {
        return Some(Duration::ZERO);
    }

    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    Some(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
}

/// Formats a duration as `HH:MM:SS`.
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Renders the status text for one update, e.g.
/// `frame=1200 fps=48.0 time=00:00:50 speed=2.00x (41%)`.
pub fn render_status(update: &ProgressUpdate, total: Option<Duration>) -> String {
    let mut parts = Vec::with_capacity(5);

    if let Some(frame) = update.frame {
        parts.push(format!("frame={}", frame));
    }
    if let Some(fps) = update.fps {
        parts.push(format!("fps={:.1}", fps));
    }
    if let Some(out_time) = update.out_time {
        parts.push(format!("time={}", format_clock(out_time)));
    }
    if let Some(speed) = update.speed {
        parts.push(format!("speed={:.2}x", speed));
    }
    if let Some(fraction) = total.and_then(|t| update.fraction_of(t)) {
        parts.push(format!("({:.0}%)", fraction * 100.0));
    }

    if parts.is_empty() {
        "starting".to_string()
    } else {
        parts.join(" ")
    }
}

/// Console area holding one status line per running job.
#[derive(Debug, Clone)]
pub struct ProgressBoard {
    multi: MultiProgress,
}

impl ProgressBoard {
    /// Board drawing to stderr.
    pub fn stderr() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
        }
    }

    /// Board that draws nothing.
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    /// Adds a status line for `job`. The line disappears when the returned
    /// bar is finished or dropped.
    pub fn job_line(&self, job: &Job) -> ProgressBar {
        let style = ProgressStyle::with_template(STATUS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(style);
        bar.set_prefix(job.label());
        bar.set_message("waiting");
        bar.enable_steady_tick(TICK_INTERVAL);
        bar
    }

    /// Runs `f` with the status lines cleared, redrawing them afterwards.
    ///
    /// Console log output goes through here so it never tears a status line.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.multi.suspend(f)
    }
}
