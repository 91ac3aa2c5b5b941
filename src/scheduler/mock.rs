//! # Mock Scheduler
//!
//! Utilities for testing code that registers jobs, without a coordination task.
//!
//! [`create_mock_scheduler`] hands out a real [`SchedulerClient`] wired to a receiver the
//! test controls. Helpers such as [`expect_register`] pop the next request so the test
//! can assert on it and answer it.
//!
//! ```rust,ignore
//! let (client, mut receiver) = create_mock_scheduler(8);
//! let registering = tokio::spawn(async move {
//!     client.register("vat_close", trigger, ConcurrencyPolicy::Queue, body).await
//! });
//!
//! let (name, _trigger, policy, respond_to) = expect_register(&mut receiver).await.unwrap();
//! assert_eq!(name, "vat_close");
//! respond_to.send(Ok(())).unwrap();
//! ```

use super::message::{Response, SchedulerRequest};
use super::{ConcurrencyPolicy, SchedulerClient, Trigger};
use crate::config::JobConfig;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, mpsc};

/// Creates a client whose requests land on the returned receiver.
pub fn create_mock_scheduler(
    buffer_size: usize,
) -> (SchedulerClient, mpsc::Receiver<SchedulerRequest>) {
    create_mock_scheduler_with_jobs(buffer_size, BTreeMap::new())
}

/// Like [`create_mock_scheduler`], with jobs declared in configuration.
pub fn create_mock_scheduler_with_jobs(
    buffer_size: usize,
    configured: BTreeMap<String, JobConfig>,
) -> (SchedulerClient, mpsc::Receiver<SchedulerRequest>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    let (events, _) = broadcast::channel(16);
    (SchedulerClient::new(sender, events, configured), receiver)
}

/// Helper to verify that the next message is a Register request
pub async fn expect_register(
    receiver: &mut mpsc::Receiver<SchedulerRequest>,
) -> Option<(String, Trigger, ConcurrencyPolicy, Response<()>)> {
    match receiver.recv().await {
        Some(SchedulerRequest::Register {
            name,
            trigger,
            policy,
            respond_to,
            ..
        }) => Some((name, trigger, policy, respond_to)),
        _ => None,
    }
}

/// Helper to verify that the next message is an Unregister request
pub async fn expect_unregister(
    receiver: &mut mpsc::Receiver<SchedulerRequest>,
) -> Option<(String, Response<()>)> {
    match receiver.recv().await {
        Some(SchedulerRequest::Unregister { name, respond_to }) => Some((name, respond_to)),
        _ => None,
    }
}

/// Helper to verify that the next message is a Shutdown request
pub async fn expect_shutdown(
    receiver: &mut mpsc::Receiver<SchedulerRequest>,
) -> Option<Response<()>> {
    match receiver.recv().await {
        Some(SchedulerRequest::Shutdown { respond_to }) => Some(respond_to),
        _ => None,
    }
}
