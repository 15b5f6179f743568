//! batch-mp4
//!
//! Converts every video under a set of directories to MP4: each source is
//! archived into `original/`, encoded into `converted/`, and published with an
//! atomic rename.

pub mod archive;
pub mod concurrency;
pub mod convert;
pub mod encode;
pub mod executor;
pub mod job;
pub mod paths;
pub mod progress;
pub mod publish;
pub mod runlog;
pub mod runner;
pub mod scan;
pub mod startup;

#[cfg(test)]
mod test_support;

pub use batch_mp4_config as config;
pub use batch_mp4_config::Config;
pub use concurrency::ConcurrencyPlan;
pub use encode::{EncodeError, EncodeSettings, Encoder, EncoderExit, FfmpegEncoder};
pub use executor::{JobExecutor, JobOutcome, JobReport, RunSummary};
pub use job::{plan_jobs, Job, JobState};
pub use paths::Layout;
pub use progress::ProgressBoard;
pub use runlog::{LogOpenError, RunLog};
pub use runner::{Runner, RunnerError, EXIT_INTERRUPTED};
pub use scan::{scan_roots, ScanCandidate, ScanOptions};
pub use startup::{run_startup_checks, StartupError};
