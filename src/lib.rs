//! # dz-erp-runtime
//!
//! > **The localized process runtime of an ERP for Algerian businesses.**
//!
//! This crate is the infrastructure layer the rest of the ERP stands on. It publishes the
//! Algerian process environment once at startup and then provides three shared services:
//! a cache with duplicate suppression, a bounded worker pool for asynchronous work, and a
//! scheduler for recurring jobs such as the monthly G50 declaration reminder or the
//! nightly backup.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Explicit services, no proxies
//! Collaborators receive the services as plain values ([`Services`](lifecycle::Services))
//! and call `get_or_compute`, `submit` or `register` on them. Nothing is intercepted.
//!
//! ### Write once, read everywhere
//! The [`ProcessEnvironment`](environment::ProcessEnvironment) (locale `ar_DZ`, timezone
//! `Africa/Algiers`, UTF-8, DZD) is published exactly once and then only read, so every
//! thread formats dates and amounts the same way.
//!
//! ### Push back instead of piling up
//! The worker pool and its queue are bounded. When they are full, submissions fail
//! immediately with `Overloaded` and scheduled fires are reported as missed.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Environment ([`environment`])
//! - **Role**: Validates locale, timezone and encoding and publishes the snapshot.
//! - **Key items**: [`EnvironmentInitializer`](environment::EnvironmentInitializer).
//!
//! ### 2. The Cache ([`cache`])
//! - **Role**: Named caches where concurrent misses on one key share a single computation.
//! - **Key items**: [`CacheCoordinator`](cache::CacheCoordinator).
//!
//! ### 3. The Worker Pool ([`executor`])
//! - **Role**: Runs tasks with admission control and cooperative cancellation.
//! - **Key items**: [`AsyncExecutor`](executor::AsyncExecutor), [`TaskHandle`](executor::TaskHandle).
//!
//! ### 4. The Scheduler ([`scheduler`])
//! - **Role**: An actor that fires jobs on fixed-rate, fixed-delay or cron triggers.
//! - **Key items**: [`SchedulerClient`](scheduler::SchedulerClient),
//!   [`ConcurrencyPolicy`](scheduler::ConcurrencyPolicy).
//!
//! ### 5. The Orchestrator ([`lifecycle`])
//! - **Role**: Starts everything in order, signals readiness and shuts down gracefully.
//! - **Key items**: [`Runtime`](lifecycle::Runtime).
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! RUST_LOG=info cargo run -- --config runtime.toml
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test
//! ```

pub mod cache;
pub mod config;
pub mod environment;
pub mod executor;
pub mod lifecycle;
pub mod scheduler;
