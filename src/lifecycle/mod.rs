//! Runtime orchestration and lifecycle management.
//!
//! This module contains the infrastructure for bringing the process up and down:
//!
//! - **Startup ordering**: Environment Initializer, then Cache Coordinator, Async Task
//!   Executor and Scheduled Task Coordinator
//! - **Readiness**: observable `Created → Starting → Ready → Stopping → Stopped`
//! - **Observability setup**: Initializing tracing and logging
//!
//! # Main Components
//!
//! - [`Runtime`] - The orchestrator that starts and stops every component
//! - [`Services`] - The shared infrastructure handed to domain collaborators
//! - [`setup_tracing`] - Initializes the tracing/logging infrastructure

pub mod error;
pub mod runtime;
pub mod tracing;

pub use error::LifecycleError;
pub use runtime::{Readiness, Runtime, Services};
pub use tracing::setup_tracing;
