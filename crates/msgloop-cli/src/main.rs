//! msgloop CLI - sample consumer of the thread-affine executor.

mod colors;
mod stress;
mod tick;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use msgloop_core::LoopConfig;

#[derive(Parser)]
#[command(name = "msgloop")]
#[command(about = "Marshal work onto a dedicated message-loop thread")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON file with loop configuration (defaults to MSGLOOP_* environment overrides)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Call into the loop from a periodic timer until Enter, Ctrl-C or the tick limit
    Tick {
        /// Timer period in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,

        /// Use begin_invoke/end_invoke instead of a blocking call
        #[arg(long = "async")]
        async_mode: bool,
    },

    /// Hammer the loop from many threads and verify every call ran exactly once, in order
    Stress {
        /// Number of caller threads
        #[arg(long, default_value = "4", value_parser = clap::value_parser!(u32).range(1..))]
        threads: u32,

        /// Calls per thread
        #[arg(long, default_value = "250")]
        calls: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format msgloop-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(loop_err) = err.downcast_ref::<msgloop_core::Error>() {
            anyhow::anyhow!("{}", loop_err.with_hint())
        } else {
            err
        }
    };

    let config = load_config(cli.config.as_deref()).map_err(|e| format_error(e.into()))?;

    match cli.command {
        Commands::Tick {
            interval_ms,
            ticks,
            async_mode,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .thread_name(tick::TIMER_THREAD_NAME)
                .enable_all()
                .build()?;
            runtime
                .block_on(tick::execute(config, interval_ms, ticks, async_mode))
                .map_err(format_error)?;
        }

        Commands::Stress { threads, calls } => {
            stress::execute(config, threads as usize, calls as usize).map_err(format_error)?;
        }
    }

    Ok(())
}

/// Resolve the loop configuration from `--config` or the environment.
fn load_config(path: Option<&Path>) -> msgloop_core::Result<LoopConfig> {
    match path {
        Some(path) => {
            tracing::debug!("Loading loop configuration from {}", path.display());
            LoopConfig::from_json_file(path)
        }
        None => {
            let config = LoopConfig::from_env();
            config.validate()?;
            Ok(config)
        }
    }
}
