//! Concurrency planning module for batch-mp4
//!
//! Derives the worker pool size and per-encode thread cap from the CPU core
//! count and configuration.

use batch_mp4_config::Config;

/// Pool size used when nothing is configured, before capping at the core count
pub const DEFAULT_MAX_JOBS: u32 = 4;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of concurrent conversion jobs
    pub max_concurrent_jobs: u32,
    /// Thread cap handed to each encoder when jobs run side by side
    pub threads_per_job: Option<u32>,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus
    /// - `jobs.max_concurrent` if non-zero, otherwise `min(4, cores)`
    /// - With more than one job, each encoder gets `cores / jobs` threads
    ///   (at least one); a single job is left uncapped
    pub fn derive(cfg: &Config) -> Self {
        Self::derive_with_cores(cfg.jobs.max_concurrent, num_cpus::get() as u32)
    }

    /// Same rules as [`ConcurrencyPlan::derive`] for a known core count.
    pub fn derive_with_cores(requested_jobs: u32, cores: u32) -> Self {
        let total_cores = cores.max(1);

        // Use explicit value if non-zero, otherwise derive
        let max_concurrent_jobs = if requested_jobs > 0 {
            requested_jobs
        } else {
            derive_max_jobs(total_cores)
        };

        let threads_per_job = if max_concurrent_jobs > 1 {
            Some((total_cores / max_concurrent_jobs).max(1))
        } else {
            None
        };

        Self {
            total_cores,
            max_concurrent_jobs,
            threads_per_job,
        }
    }

    pub fn is_serial(&self) -> bool {
        self.max_concurrent_jobs == 1
    }
}

fn derive_max_jobs(cores: u32) -> u32 {
    cores.min(DEFAULT_MAX_JOBS)
}
