//! # Scheduled Task Coordinator
//!
//! Fires registered jobs on fixed-rate, fixed-delay or cron triggers and keeps runs of
//! the same job from piling up.
//!
//! ## Architecture
//!
//! The scheduler follows the actor pattern used across the runtime:
//!
//! - [`SchedulerCoordinator`] is the server half. It owns every job's state on a single
//!   task and processes [`SchedulerRequest`](message::SchedulerRequest)s sequentially.
//! - [`SchedulerClient`] is the cloneable client half handed to collaborators.
//!
//! Job bodies never run on the coordination task. Each fire is submitted to the shared
//! [`AsyncExecutor`](crate::executor::AsyncExecutor), under the same admission control
//! as any other task; a rejected fire becomes a `MissedFire` event with reason
//! `Overloaded`.
//!
//! ## Per-job state
//!
//! ```text
//!          fire                    worker picks the run up
//!  Idle ──────────► Triggered ─────────────────────────────► Running
//!   ▲      (run handed to executor)                            │
//!   └──────────────────────── Finished ─────────────────────────┘
//! ```
//!
//! A run waits in `Triggered` while every worker is busy. A fire that arrives while the
//! job is `Triggered` or `Running` is resolved by its [`ConcurrencyPolicy`]:
//!
//! | Policy | Fire while busy |
//! |---|---|
//! | `SkipIfRunning` (default) | dropped, `MissedFire { reason: Skipped }` |
//! | `Queue` | buffered once; further fires `MissedFire { reason: QueueFull }` |
//! | `RunConcurrently` | started immediately |
//!
//! ## Events
//!
//! `Started`, `Completed`, `JobFailed` and `MissedFire` are broadcast to every
//! [`subscribe`](SchedulerClient::subscribe)r and logged. A failing job keeps its schedule.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod job;
pub mod message;
pub mod mock;
pub mod trigger;

pub use client::SchedulerClient;
pub use coordinator::SchedulerCoordinator;
pub use error::SchedulerError;
pub use event::{JobState, MissedFireReason, SchedulerEvent};
pub use job::{job_fn, ConcurrencyPolicy, FnJob, Job};
pub use trigger::Trigger;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::environment::EnvironmentInitializer;
    use crate::executor::{AsyncExecutor, TaskError};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::time::Instant;

    fn start_scheduler(pool_size: usize, queue_depth: usize) -> (SchedulerClient, AsyncExecutor) {
        let environment = EnvironmentInitializer::new()
            .initialize("ar_DZ", "Africa/Algiers", "UTF-8")
            .unwrap();
        let executor = AsyncExecutor::start(
            ExecutorConfig {
                pool_size,
                queue_depth,
                drain_grace_period: Duration::from_secs(1),
            },
            environment.clone(),
        );
        let (coordinator, client) =
            SchedulerCoordinator::new(32, executor.clone(), environment, BTreeMap::new());
        tokio::spawn(coordinator.run());
        (client, executor)
    }

    async fn next_event(events: &mut broadcast::Receiver<SchedulerEvent>) -> SchedulerEvent {
        events.recv().await.unwrap()
    }

    fn assert_near(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(20),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_if_running_drops_overlapping_fires() {
        let (scheduler, _executor) = start_scheduler(2, 4);
        let mut events = scheduler.subscribe();
        let origin = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let recorded = starts.clone();
        scheduler
            .register(
                "stock_sync",
                Trigger::fixed_rate(Duration::from_millis(100)),
                ConcurrencyPolicy::SkipIfRunning,
                move |_| {
                    let recorded = recorded.clone();
                    async move {
                        recorded.lock().unwrap().push(origin.elapsed());
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();

        let mut skipped = 0;
        while starts.lock().unwrap().len() < 3 {
            if let SchedulerEvent::MissedFire { reason, .. } = next_event(&mut events).await {
                assert_eq!(reason, MissedFireReason::Skipped);
                skipped += 1;
            }
        }

        let starts = starts.lock().unwrap().clone();
        assert_near(starts[0], 0);
        assert_near(starts[1], 300);
        assert_near(starts[2], 600);
        assert!(skipped >= 4, "skipped {skipped}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_buffers_one_fire() {
        let (scheduler, _executor) = start_scheduler(2, 4);
        let mut events = scheduler.subscribe();
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));

        let (active, overlap) = (running.clone(), overlapped.clone());
        scheduler
            .register(
                "whatsapp_outbox",
                Trigger::fixed_rate(Duration::from_millis(100)),
                ConcurrencyPolicy::Queue,
                move |_| {
                    let (active, overlap) = (active.clone(), overlap.clone());
                    async move {
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();

        // 0: start, 100: queued, 200: dropped, 250: queued fire starts.
        assert!(matches!(next_event(&mut events).await, SchedulerEvent::Started { .. }));
        assert_eq!(
            next_event(&mut events).await,
            SchedulerEvent::MissedFire {
                job: "whatsapp_outbox".to_string(),
                reason: MissedFireReason::QueueFull,
            }
        );
        assert_eq!(
            next_event(&mut events).await,
            SchedulerEvent::Completed {
                job: "whatsapp_outbox".to_string()
            }
        );
        assert!(matches!(next_event(&mut events).await, SchedulerEvent::Started { .. }));
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_keeps_schedule() {
        let (scheduler, _executor) = start_scheduler(1, 1);
        let mut events = scheduler.subscribe();

        scheduler
            .register(
                "einvoice_submit",
                Trigger::fixed_rate(Duration::from_secs(60)),
                ConcurrencyPolicy::default(),
                |_| async { Err(TaskError::failed("portal unreachable")) },
            )
            .await
            .unwrap();

        for _ in 0..2 {
            assert!(matches!(next_event(&mut events).await, SchedulerEvent::Started { .. }));
            assert_eq!(
                next_event(&mut events).await,
                SchedulerEvent::JobFailed {
                    job: "einvoice_submit".to_string(),
                    cause: "portal unreachable".to_string(),
                }
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_waits_for_completion() {
        let (scheduler, _executor) = start_scheduler(1, 1);
        let origin = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let mut events = scheduler.subscribe();

        let recorded = starts.clone();
        scheduler
            .register(
                "bank_reconciliation",
                Trigger::fixed_delay(Duration::from_millis(100)),
                ConcurrencyPolicy::default(),
                move |_| {
                    let recorded = recorded.clone();
                    async move {
                        recorded.lock().unwrap().push(origin.elapsed());
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();

        while starts.lock().unwrap().len() < 3 {
            let event = next_event(&mut events).await;
            assert!(!matches!(event, SchedulerEvent::MissedFire { .. }));
        }
        let starts = starts.lock().unwrap().clone();
        assert_near(starts[0], 0);
        assert_near(starts[1], 150);
        assert_near(starts[2], 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_concurrently_overlaps_runs() {
        let (scheduler, _executor) = start_scheduler(4, 4);
        let mut events = scheduler.subscribe();
        let origin = Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (recorded, running, highest) = (starts.clone(), active.clone(), peak.clone());
        scheduler
            .register(
                "sms_dispatch",
                Trigger::fixed_rate(Duration::from_millis(100)),
                ConcurrencyPolicy::RunConcurrently,
                move |_| {
                    let (recorded, running, highest) =
                        (recorded.clone(), running.clone(), highest.clone());
                    async move {
                        recorded.lock().unwrap().push(origin.elapsed());
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        highest.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();

        let mut started = 0;
        while started < 3 {
            match next_event(&mut events).await {
                SchedulerEvent::Started { .. } => started += 1,
                SchedulerEvent::MissedFire { reason, .. } => panic!("missed fire: {reason}"),
                _ => {}
            }
        }
        assert_eq!(
            scheduler.job_state("sms_dispatch").await,
            Ok(JobState::Running {
                runs: 3,
                pending: false
            })
        );

        let starts = starts.lock().unwrap().clone();
        assert_near(starts[0], 0);
        assert_near(starts[1], 100);
        assert_near(starts[2], 200);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    /// A fire waiting for a busy worker is `Triggered`, and becomes `Running` once a
    /// worker picks it up.
    #[tokio::test(start_paused = true)]
    async fn test_triggered_until_worker_available() {
        let (scheduler, executor) = start_scheduler(1, 2);
        let mut events = scheduler.subscribe();
        let (release_worker, worker_gate) = tokio::sync::oneshot::channel::<()>();
        let blocker = executor
            .submit(|_| async move {
                let _ = worker_gate.await;
                Ok(())
            })
            .unwrap();

        let (finish, job_gate) = tokio::sync::watch::channel(false);
        scheduler
            .register(
                "payroll_export",
                Trigger::fixed_rate(Duration::from_secs(3600)),
                ConcurrencyPolicy::default(),
                move |_| {
                    let mut job_gate = job_gate.clone();
                    async move {
                        let _ = job_gate.wait_for(|done| *done).await;
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            scheduler.job_state("payroll_export").await,
            Ok(JobState::Triggered { pending: false })
        );

        release_worker.send(()).unwrap();
        blocker.join().await.unwrap();
        assert!(matches!(next_event(&mut events).await, SchedulerEvent::Started { .. }));
        assert_eq!(
            scheduler.job_state("payroll_export").await,
            Ok(JobState::Running {
                runs: 1,
                pending: false
            })
        );

        finish.send(true).unwrap();
        assert!(matches!(next_event(&mut events).await, SchedulerEvent::Completed { .. }));
        assert_eq!(scheduler.job_state("payroll_export").await, Ok(JobState::Idle));
    }

    /// Cron deadlines follow the wall clock, so this one runs in real time.
    #[tokio::test]
    async fn test_cron_trigger_fires_every_second() {
        let (scheduler, _executor) = start_scheduler(1, 1);
        let mut events = scheduler.subscribe();

        scheduler
            .register(
                "heartbeat",
                Trigger::cron("* * * * * *").unwrap(),
                ConcurrencyPolicy::default(),
                |_| async { Ok(()) },
            )
            .await
            .unwrap();

        let mut starts = Vec::new();
        while starts.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(5), next_event(&mut events))
                .await
                .expect("cron job did not fire");
            match event {
                SchedulerEvent::Started { job } => {
                    assert_eq!(job, "heartbeat");
                    starts.push(Instant::now());
                }
                SchedulerEvent::MissedFire { reason, .. } => panic!("missed fire: {reason}"),
                _ => {}
            }
        }

        let gap = starts[1] - starts[0];
        assert!(
            gap >= Duration::from_millis(500) && gap <= Duration::from_millis(1500),
            "gap between cron fires: {gap:?}"
        );
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_jobs() {
        let (scheduler, _executor) = start_scheduler(1, 1);
        let trigger = Trigger::fixed_rate(Duration::from_secs(3600));

        scheduler
            .register("g50_reminder", trigger.clone(), ConcurrencyPolicy::default(), |_| async {
                Ok(())
            })
            .await
            .unwrap();
        let duplicate = scheduler
            .register("g50_reminder", trigger, ConcurrencyPolicy::default(), |_| async {
                Ok(())
            })
            .await;
        assert_eq!(
            duplicate,
            Err(SchedulerError::DuplicateJob("g50_reminder".to_string()))
        );

        scheduler.unregister("g50_reminder").await.unwrap();
        assert_eq!(
            scheduler.unregister("g50_reminder").await,
            Err(SchedulerError::UnknownJob("g50_reminder".to_string()))
        );
        assert_eq!(
            scheduler.job_state("g50_reminder").await,
            Err(SchedulerError::UnknownJob("g50_reminder".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overloaded_executor_misses_fire() {
        let (scheduler, executor) = start_scheduler(1, 0);
        let mut events = scheduler.subscribe();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let blocker = executor
            .submit(|_| async move {
                let _ = gate.await;
                Ok(())
            })
            .unwrap();

        scheduler
            .register(
                "exchange_rates",
                Trigger::fixed_rate(Duration::from_secs(3600)),
                ConcurrencyPolicy::default(),
                |_| async { Ok(()) },
            )
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut events).await,
            SchedulerEvent::MissedFire {
                job: "exchange_rates".to_string(),
                reason: MissedFireReason::Overloaded,
            }
        );
        release.send(()).unwrap();
        blocker.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_coordinator() {
        let (scheduler, _executor) = start_scheduler(1, 1);
        scheduler.shutdown().await.unwrap();
        let result = scheduler
            .register(
                "backup",
                Trigger::fixed_rate(Duration::from_secs(1)),
                ConcurrencyPolicy::default(),
                |_| async { Ok(()) },
            )
            .await;
        assert!(matches!(
            result,
            Err(SchedulerError::Closed) | Err(SchedulerError::Dropped)
        ));
    }
}
