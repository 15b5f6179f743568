//! CLI entry point for batch-mp4
//!
//! Parses command line arguments, builds the runner and converts the given
//! directories.

use batch_mp4::config::EncoderMode;
use batch_mp4::{Config, ProgressBoard, RunLog, Runner, RunnerError, EXIT_INTERRUPTED};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

/// batch-mp4 - Convert every video in a directory tree to MP4
#[derive(Parser, Debug)]
#[command(name = "batch-mp4")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directories to scan
    #[arg(default_value = ".")]
    dirs: Vec<PathBuf>,

    /// List what would be converted without touching anything
    #[arg(short, long)]
    dry_run: bool,

    /// Maximum number of conversions running at once
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    jobs: Option<u32>,

    /// Encoder profile to use (hardware or software)
    #[arg(short, long)]
    encoder: Option<EncoderMode>,

    /// Shorthand for --encoder hardware
    #[arg(short, long, conflicts_with = "encoder")]
    fast: bool,

    /// Path to the configuration file, used only if it exists
    #[arg(short, long, default_value = "batch-mp4.toml")]
    config: PathBuf,

    /// Debug-level console logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply_to(&self, config: &mut Config) {
        if let Some(jobs) = self.jobs {
            config.jobs.max_concurrent = jobs;
        }
        if self.fast {
            config.encoder.mode = EncoderMode::Hardware;
        } else if let Some(mode) = self.encoder {
            config.encoder.mode = mode;
        }
    }
}

/// Stderr writer that clears the progress lines while a log line is written.
struct BoardWriter {
    board: ProgressBoard,
}

impl Write for BoardWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.board.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.board.suspend(|| io::stderr().flush())
    }
}

fn init_tracing(verbose: bool, board: &ProgressBoard) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let board = board.clone();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(move || BoardWriter {
            board: board.clone(),
        })
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version print through the same path
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let board = ProgressBoard::stderr();
    init_tracing(args.verbose, &board);

    match run(args, board).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, board: ProgressBoard) -> Result<ExitCode, RunnerError> {
    let mut config = Config::load_or_default(&args.config)?;
    args.apply_to(&mut config);
    debug!("Configuration: {:?}", config);

    let runner = Runner::new(config)?.with_progress(board);
    let plan = runner.concurrency_plan();
    debug!(
        "Using {} concurrent job(s) on {} core(s)",
        plan.max_concurrent_jobs, plan.total_cores
    );

    if args.dry_run {
        let stdout = io::stdout();
        if let Err(e) = runner.dry_run(&args.dirs, &mut stdout.lock()) {
            error!("Failed to write plan: {}", e);
            return Ok(ExitCode::FAILURE);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let log = Arc::new(RunLog::open(&PathBuf::from("."), &runner.config().logging)?);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            trigger.cancel();
        }
    });

    let summary = runner.run(&args.dirs, log, cancel).await;
    println!("{}", summary);

    if summary.interrupted {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
