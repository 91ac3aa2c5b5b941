//! # dz-erp-runtime
//!
//! Starts the shared runtime of the ERP process: publishes the Algerian process
//! environment, brings up the caches, the worker pool and the scheduler, then waits for
//! Ctrl-C and shuts down gracefully.
//!
//! ```bash
//! RUST_LOG=info dz-erp-runtime --config /etc/erp/runtime.toml
//! ```
//!
//! Exit status follows `sysexits.h`: 78 when the locale, timezone or encoding is not
//! recognized, 66 when the configuration file cannot be read, 65 when it does not parse or
//! holds an out-of-range value.

use clap::Parser;
use dz_erp_runtime::config::{RuntimeConfig, CONFIG_ENV_VAR};
use dz_erp_runtime::lifecycle::{setup_tracing, LifecycleError, Runtime};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "dz-erp-runtime", version, about = "Localized runtime of the ERP process")]
struct Cli {
    /// Runtime configuration file (TOML). Defaults apply when absent.
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Runtime aborted");
            eprintln!("dz-erp-runtime: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), LifecycleError> {
    let mut runtime = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            Runtime::from_path(path)?
        }
        None => {
            info!("No configuration file, using defaults");
            Runtime::new(RuntimeConfig::default())
        }
    };
    let grace = runtime.config().executor.drain_grace_period;

    let services = runtime.start()?;
    info!(
        configured_jobs = services.scheduler.configured_jobs().count(),
        "Waiting for Ctrl-C"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }
    info!("Shutdown requested");

    runtime.stop(grace).await
}
