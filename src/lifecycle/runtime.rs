use super::LifecycleError;
use crate::cache::CacheCoordinator;
use crate::config::RuntimeConfig;
use crate::environment::{EnvironmentInitializer, ProcessEnvironment};
use crate::executor::AsyncExecutor;
use crate::scheduler::{SchedulerClient, SchedulerCoordinator};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SCHEDULER_BUFFER: usize = 64;

/// Observable startup state of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Created,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

/// The shared infrastructure handed to domain collaborators once the runtime is ready.
#[derive(Clone)]
pub struct Services {
    pub environment: Arc<ProcessEnvironment>,
    pub cache: Arc<CacheCoordinator>,
    pub executor: AsyncExecutor,
    pub scheduler: SchedulerClient,
}

struct Running {
    services: Services,
    coordinator: JoinHandle<()>,
}

/// The lifecycle orchestrator.
///
/// `Runtime` is responsible for:
/// - **Startup ordering**: environment first, then cache, executor and scheduler
/// - **Fail fast**: an environment failure aborts startup before anything else exists
/// - **Shutdown**: scheduler first, then the executor drain, then the caches
///
/// # Example
///
/// ```ignore
/// let mut runtime = Runtime::new(RuntimeConfig::from_path(path)?);
/// let services = runtime.start()?;
///
/// services
///     .scheduler
///     .register_configured("g50_reminder", remind_g50)
///     .await?;
///
/// runtime.stop(Duration::from_secs(30)).await?;
/// ```
pub struct Runtime<'a> {
    config: RuntimeConfig,
    initializer: &'a EnvironmentInitializer,
    readiness: watch::Sender<Readiness>,
    running: Option<Running>,
}

impl Runtime<'static> {
    /// A runtime that publishes to the process-wide environment initializer.
    pub fn new(config: RuntimeConfig) -> Self {
        Runtime::with_initializer(config, EnvironmentInitializer::global())
    }

    /// Loads and validates the configuration file, then builds the runtime.
    pub fn from_path(path: &Path) -> Result<Self, LifecycleError> {
        let config = RuntimeConfig::from_path(path)?;
        Ok(Runtime::new(config))
    }
}

impl<'a> Runtime<'a> {
    pub fn with_initializer(config: RuntimeConfig, initializer: &'a EnvironmentInitializer) -> Self {
        let (readiness, _) = watch::channel(Readiness::Created);
        Self {
            config,
            initializer,
            readiness,
            running: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn readiness(&self) -> Readiness {
        *self.readiness.borrow()
    }

    /// Watches readiness transitions, e.g. from a health endpoint.
    pub fn subscribe_readiness(&self) -> watch::Receiver<Readiness> {
        self.readiness.subscribe()
    }

    /// Brings up every component in dependency order.
    ///
    /// Must be called inside a Tokio runtime. A second call fails with
    /// [`LifecycleError::AlreadyStarted`].
    pub fn start(&mut self) -> Result<Services, LifecycleError> {
        if self.readiness() != Readiness::Created {
            warn!(readiness = ?self.readiness(), "Start requested twice");
            return Err(LifecycleError::AlreadyStarted);
        }
        self.readiness.send_replace(Readiness::Starting);
        info!("Starting runtime...");

        // =====================================================================
        // Step 1: Publish the process environment
        // =====================================================================

        let environment = match self
            .initializer
            .initialize_from(&self.config.environment_settings())
        {
            Ok(environment) => environment,
            Err(e) => {
                error!(error = %e, "Environment initialization failed, aborting startup");
                self.readiness.send_replace(Readiness::Failed);
                return Err(e.into());
            }
        };

        // =====================================================================
        // Step 2: Start the components that depend on it
        // =====================================================================

        let cache = Arc::new(CacheCoordinator::new(&self.config.cache));
        let executor = AsyncExecutor::start(self.config.executor.clone(), environment.clone());
        let (coordinator, scheduler) = SchedulerCoordinator::new(
            SCHEDULER_BUFFER,
            executor.clone(),
            environment.clone(),
            self.config.job.clone(),
        );
        let coordinator = tokio::spawn(coordinator.run());

        let services = Services {
            environment,
            cache,
            executor,
            scheduler,
        };
        self.running = Some(Running {
            services: services.clone(),
            coordinator,
        });

        self.readiness.send_replace(Readiness::Ready);
        info!(
            version = env!("CARGO_PKG_VERSION"),
            locale = %services.environment.locale(),
            timezone = %services.environment.timezone(),
            encoding = %services.environment.encoding(),
            currency = services.environment.currency(),
            "Runtime ready"
        );
        Ok(services)
    }

    /// Stops the scheduler, drains the executor for up to `grace`, then clears the
    /// caches.
    pub async fn stop(mut self, grace: Duration) -> Result<(), LifecycleError> {
        let Some(Running {
            services,
            coordinator,
        }) = self.running.take()
        else {
            return Err(LifecycleError::NotStarted);
        };
        self.readiness.send_replace(Readiness::Stopping);
        info!(grace = ?grace, "Stopping runtime...");

        // =====================================================================
        // Step 1: No new triggers
        // =====================================================================

        if let Err(e) = services.scheduler.shutdown().await {
            warn!(error = %e, "Scheduler already stopped");
        }
        if let Err(e) = coordinator.await {
            error!("Scheduler task failed: {:?}", e);
            self.readiness.send_replace(Readiness::Failed);
            return Err(LifecycleError::Coordinator(e.to_string()));
        }

        // =====================================================================
        // Step 2: Drain running and queued work
        // =====================================================================

        if !services.executor.shutdown(grace).await {
            warn!("Unfinished tasks were cancelled");
        }

        // =====================================================================
        // Step 3: Caches are not persisted
        // =====================================================================

        services.cache.clear();

        self.readiness.send_replace(Readiness::Stopped);
        info!("Runtime stopped.");
        Ok(())
    }
}
