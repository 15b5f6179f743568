//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Source discovery settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    /// Descend into subdirectories of each scanned root (default true)
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Video extensions picked up by the scan, matched case-insensitively
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_recursive() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    [
        "mp4", "mkv", "avi", "mov", "m4v", "wmv", "flv", "webm", "mpg", "mpeg", "ts", "m2ts",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            recursive: default_recursive(),
            extensions: default_extensions(),
        }
    }
}

/// Names of the sibling directories created next to the sources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutConfig {
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
    #[serde(default = "default_converted_dir")]
    pub converted_dir: String,
}

fn default_archive_dir() -> String {
    "original".to_string()
}

fn default_converted_dir() -> String {
    "converted".to_string()
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            converted_dir: default_converted_dir(),
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
    /// Maximum concurrent conversions (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent: u32,
    /// How long an interrupted run waits for in-flight rollbacks
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Which encoder profile a run uses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderMode {
    /// Software codec: slower, smaller output at a given quality
    #[default]
    Software,
    /// Hardware-accelerated codec: faster, different size/quality trade-off
    Hardware,
}

impl fmt::Display for EncoderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderMode::Software => write!(f, "software"),
            EncoderMode::Hardware => write!(f, "hardware"),
        }
    }
}

impl FromStr for EncoderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "software" | "sw" => Ok(EncoderMode::Software),
            "hardware" | "hw" => Ok(EncoderMode::Hardware),
            other => Err(format!(
                "unknown encoder '{}', expected 'software' or 'hardware'",
                other
            )),
        }
    }
}

/// Codec and quality parameters handed to the encoder verbatim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderProfile {
    pub video_codec: String,
    /// Constant rate factor; takes precedence over `video_bitrate`
    #[serde(default)]
    pub crf: Option<u32>,
    #[serde(default)]
    pub video_bitrate: Option<String>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub pixel_format: Option<String>,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default)]
    pub audio_bitrate: Option<String>,
    /// Extra arguments placed after the codec options
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

impl EncoderProfile {
    /// libx264 at CRF 23, the usual quality/size balance for archival MP4
    pub fn software() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            crf: Some(23),
            video_bitrate: None,
            preset: Some("medium".to_string()),
            pixel_format: Some("yuv420p".to_string()),
            audio_codec: default_audio_codec(),
            audio_bitrate: Some("192k".to_string()),
            extra_args: Vec::new(),
        }
    }

    /// VideoToolbox H.264 at a fixed bitrate
    pub fn hardware() -> Self {
        Self {
            video_codec: "h264_videotoolbox".to_string(),
            crf: None,
            video_bitrate: Some("8M".to_string()),
            preset: None,
            pixel_format: Some("yuv420p".to_string()),
            audio_codec: default_audio_codec(),
            audio_bitrate: Some("192k".to_string()),
            extra_args: Vec::new(),
        }
    }
}

/// Encoder selection plus both profiles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default)]
    pub mode: EncoderMode,
    #[serde(default = "EncoderProfile::software")]
    pub software: EncoderProfile,
    #[serde(default = "EncoderProfile::hardware")]
    pub hardware: EncoderProfile,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            mode: EncoderMode::default(),
            software: EncoderProfile::software(),
            hardware: EncoderProfile::hardware(),
        }
    }
}

impl EncoderConfig {
    /// Profile selected by `mode`
    pub fn active_profile(&self) -> &EncoderProfile {
        match self.mode {
            EncoderMode::Software => &self.software,
            EncoderMode::Hardware => &self.hardware,
        }
    }
}

/// External programs the pipeline shells out to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

/// Log file names, relative to the working directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_all_events_log")]
    pub all_events: String,
    #[serde(default = "default_errors_log")]
    pub errors: String,
}

fn default_all_events_log() -> String {
    "batch-mp4.log".to_string()
}

fn default_errors_log() -> String {
    "batch-mp4-errors.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            all_events: default_all_events_log(),
            errors: default_errors_log(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - BATCH_MP4_JOBS -> jobs.max_concurrent
    /// - BATCH_MP4_ENCODER -> encoder.mode
    /// - BATCH_MP4_FFMPEG -> tools.ffmpeg
    /// - BATCH_MP4_FFPROBE -> tools.ffprobe
    /// - BATCH_MP4_RECURSIVE -> scan.recursive
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("BATCH_MP4_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.jobs.max_concurrent = jobs;
            }
        }

        if let Ok(val) = env::var("BATCH_MP4_ENCODER") {
            if let Ok(mode) = val.parse::<EncoderMode>() {
                self.encoder.mode = mode;
            }
        }

        if let Ok(val) = env::var("BATCH_MP4_FFMPEG") {
            if !val.is_empty() {
                self.tools.ffmpeg = val;
            }
        }

        if let Ok(val) = env::var("BATCH_MP4_FFPROBE") {
            if !val.is_empty() {
                self.tools.ffprobe = val;
            }
        }

        if let Ok(val) = env::var("BATCH_MP4_RECURSIVE") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.scan.recursive = true,
                "false" | "0" | "no" => self.scan.recursive = false,
                _ => {}
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }
}
