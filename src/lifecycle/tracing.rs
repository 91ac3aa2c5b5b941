//! # Observability & Tracing
//!
//! [`setup_tracing`] installs the process-wide `tracing` subscriber. It is called once by
//! the binary, before the runtime starts, so that a fatal environment failure is already
//! logged.
//!
//! ## Configuration
//!
//! Output uses the compact format without module paths (`with_target(false)`); every
//! component identifies itself with structured fields instead (`cache`, `key`, `task_id`,
//! `job`). The level comes from `RUST_LOG` and defaults to `info`.
//!
//! ```bash
//! # Startup banner, job runs, missed fires
//! RUST_LOG=info dz-erp-runtime --config runtime.toml
//!
//! # Cache hits and misses, task submissions
//! RUST_LOG=debug dz-erp-runtime --config runtime.toml
//!
//! # Only the scheduler at debug
//! RUST_LOG=info,dz_erp_runtime::scheduler=debug dz-erp-runtime
//! ```
//!
//! ## What Gets Traced
//!
//! ```text
//! INFO Environment published locale=ar_DZ timezone=Africa/Algiers encoding=UTF-8 currency=DZD
//! INFO Executor started pool_size=4 queue_depth=64
//! INFO Scheduler started
//! INFO Runtime ready version="0.1.0" locale=ar_DZ timezone=Africa/Algiers
//! INFO register_job{job="g50_reminder" policy=SkipIfRunning}: Registered
//! INFO Missed fire job=stock_sync reason=skipped
//! WARN Job failed job=einvoice_submit error=Task failed: portal unreachable
//! ```
use tracing_subscriber::EnvFilter;

pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
