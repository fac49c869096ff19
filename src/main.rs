//! Event Router - Entry Point
//!
//! Parses the command line, installs logging, loads the configuration
//! and runs the router until it is signalled or a component fails.
//!
//! Wiring sequence:
//! 1. Parse arguments (`--config`, `--log-level`, `--log-json`)
//! 2. Init tracing (plain or JSON structured logging)
//! 3. Load config.toml + validate
//! 4. Build metrics server, processor and provider
//! 5. Run metrics, stream and shutdown tasks until SIGINT/SIGTERM
//! 6. Exit nonzero only if a non-cancellation error escaped

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use event_router::cli::{self, Args};
use event_router::config::loader::load_config;
use event_router::error::RouterError;
use event_router::usecases::lifecycle;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = cli::init_tracing(&args) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Starting event router"
    );

    match run(&args).await {
        Ok(()) => {
            info!("Event router stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Event router failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<(), RouterError> {
    let config = load_config(&args.config).map_err(RouterError::Config)?;
    lifecycle::run(&config).await
}
