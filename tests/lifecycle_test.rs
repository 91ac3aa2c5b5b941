use dz_erp_runtime::config::RuntimeConfig;
use dz_erp_runtime::environment::{EnvironmentError, EnvironmentInitializer};
use dz_erp_runtime::executor::TaskError;
use dz_erp_runtime::lifecycle::{LifecycleError, Readiness, Runtime};
use dz_erp_runtime::scheduler::{SchedulerError, SchedulerEvent};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
locale = "ar_DZ"
timezone = "Africa/Algiers"
encoding = "UTF-8"

[cache.tva_rates]
max_size = 64
ttl = "1h"

[executor]
pool_size = 2
queue_depth = 8
drain_grace_period = "2s"

[job.tva_refresh]
trigger = { fixed_rate = "1h" }
concurrency_policy = "skip_if_running"
"#;

/// Full startup from a configuration file, a configured job that goes through the
/// shared cache, then a graceful stop.
#[tokio::test]
async fn test_configured_runtime_end_to_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config = RuntimeConfig::from_path(file.path()).unwrap();

    let initializer = EnvironmentInitializer::new();
    let mut runtime = Runtime::with_initializer(config, &initializer);
    let services = runtime.start().unwrap();
    assert_eq!(runtime.readiness(), Readiness::Ready);

    let mut events = services.scheduler.subscribe();
    let computations = Arc::new(AtomicUsize::new(0));

    let (cache, counter) = (services.cache.clone(), computations.clone());
    services
        .scheduler
        .register_configured("tva_refresh", move |ctx| {
            let (cache, counter) = (cache.clone(), counter.clone());
            async move {
                let rate = cache
                    .get_or_compute("tva_rates", "normale", || async {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(19u8)
                    })
                    .await
                    .map_err(TaskError::failed)?;
                let label = ctx.environment().format_amount(i64::from(*rate) * 100);
                assert_eq!(label, "19,00 DZD");
                Ok(())
            }
        })
        .await
        .unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        SchedulerEvent::Started {
            job: "tva_refresh".to_string()
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        SchedulerEvent::Completed {
            job: "tva_refresh".to_string()
        }
    );
    assert_eq!(computations.load(Ordering::SeqCst), 1);
    assert_eq!(services.cache.stats("tva_rates").unwrap().entries, 1);

    let mut readiness = runtime.subscribe_readiness();
    runtime.stop(Duration::from_secs(2)).await.unwrap();
    assert_eq!(*readiness.borrow_and_update(), Readiness::Stopped);

    assert_eq!(services.cache.stats("tva_rates").unwrap().entries, 0);
    assert!(matches!(
        services.executor.submit(|_| async { Ok(()) }),
        Err(TaskError::Overloaded)
    ));
    assert!(matches!(
        services.scheduler.unregister("tva_refresh").await,
        Err(SchedulerError::Closed) | Err(SchedulerError::Dropped)
    ));
}

/// The process-wide environment is published once; a later attempt fails and leaves
/// the first snapshot in place.
#[tokio::test]
async fn test_global_environment_published_once() {
    let mut runtime = Runtime::new(RuntimeConfig::default());
    let services = runtime.start().unwrap();

    let global = EnvironmentInitializer::global();
    assert!(global.is_initialized());
    assert_eq!(
        global.initialize("fr_FR", "Europe/Paris", "ISO-8859-1").unwrap_err(),
        EnvironmentError::AlreadyInitialized
    );
    let published = global.get().unwrap();
    assert!(Arc::ptr_eq(&published, &services.environment));
    assert_eq!(published.locale().to_string(), "ar_DZ");
    assert_eq!(published.timezone().name(), "Africa/Algiers");

    // A second runtime in the same process cannot publish again.
    let mut second = Runtime::new(RuntimeConfig::default());
    assert!(matches!(
        second.start(),
        Err(LifecycleError::Environment(EnvironmentError::AlreadyInitialized))
    ));
    assert_eq!(second.readiness(), Readiness::Failed);

    runtime.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_unknown_encoding_aborts_startup() {
    let config = RuntimeConfig::from_toml_str(r#"encoding = "EBCDIC""#).unwrap();
    let initializer = EnvironmentInitializer::new();
    let mut runtime = Runtime::with_initializer(config, &initializer);

    let err = match runtime.start() {
        Err(e) => e,
        Ok(_) => panic!("startup should fail"),
    };
    assert_eq!(err.exit_code(), 78);
    assert!(err.to_string().contains("EBCDIC"));
    assert_eq!(runtime.readiness(), Readiness::Failed);
    assert!(initializer.get().is_none());
}

#[test]
fn test_unreadable_config_file() {
    let err = Runtime::from_path(std::path::Path::new("/nonexistent/runtime.toml"))
        .err()
        .unwrap();
    assert_eq!(err.exit_code(), 66);
}

#[test]
fn test_malformed_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[executor\npool_size = ").unwrap();
    let err = Runtime::from_path(file.path()).err().unwrap();
    assert_eq!(err.exit_code(), 65);
}

#[test]
fn test_invalid_config_value_has_its_own_exit_status() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[executor]\npool_size = 0\n").unwrap();
    let err = Runtime::from_path(file.path()).err().unwrap();
    assert_eq!(err.exit_code(), 65);
    assert_ne!(err.exit_code(), 78);
}
