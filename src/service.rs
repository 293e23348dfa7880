//! Service assembly: wires registry, worker pool, sweeper and coordinator
//! from one `LauncherConfig`. Whoever builds the service owns its lifecycle.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::config::LauncherConfig;
use crate::core::errors::Result;
use crate::launch::{
    BoxedJob, DefaultKeyBuilder, ExecutionListener, ExecutionRecord, ExecutionRegistry,
    KeyBuilder, LaunchAccepted, LaunchCoordinator, RetentionSweeper, RunKey, RunParameters,
    WorkerPool, WorkerPoolConfig,
};

pub struct LauncherService {
    coordinator: LaunchCoordinator,
    sweeper: Mutex<Option<RetentionSweeper>>,
    config: LauncherConfig,
}

impl LauncherService {
    /// Start all components. Must be called from within a tokio runtime.
    pub fn start(
        config: LauncherConfig,
        key_builder: Arc<dyn KeyBuilder>,
        listeners: Vec<Arc<dyn ExecutionListener>>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ExecutionRegistry::with_rerun_policy(config.rerun_policy));
        let pool = WorkerPool::start(
            Arc::clone(&registry),
            WorkerPoolConfig {
                workers: config.workers,
                queue_capacity: config.queue_capacity,
            },
            listeners,
        )?;
        let sweeper = RetentionSweeper::start(
            Arc::clone(&registry),
            config.retention,
            config.sweep_interval,
        )?;
        let coordinator = LaunchCoordinator::new(key_builder, registry, Arc::new(pool));

        info!(
            workers = config.workers,
            retention = ?config.retention,
            rerun_policy = ?config.rerun_policy,
            "Launcher service started"
        );

        Ok(Self {
            coordinator,
            sweeper: Mutex::new(Some(sweeper)),
            config,
        })
    }

    pub fn builder() -> LauncherServiceBuilder {
        LauncherServiceBuilder::new()
    }

    pub fn launch(&self, params: RunParameters, body: BoxedJob) -> Result<LaunchAccepted> {
        self.coordinator.launch(params, body)
    }

    pub fn status(&self, key: &RunKey) -> Option<ExecutionRecord> {
        self.coordinator.status(key)
    }

    pub fn coordinator(&self) -> &LaunchCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        self.coordinator.registry()
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Stop the sweeper and drain the worker pool within the configured grace
    /// period. Returns true if all job bodies finished in time.
    pub async fn shutdown(&self) -> bool {
        if let Some(mut sweeper) = self.sweeper.lock().await.take() {
            sweeper.stop();
        }
        let drained = self
            .coordinator
            .pool()
            .shutdown(self.config.shutdown_grace)
            .await;
        info!(drained, "Launcher service stopped");
        drained
    }
}

/// Builder for LauncherService
pub struct LauncherServiceBuilder {
    config: Option<LauncherConfig>,
    key_builder: Option<Arc<dyn KeyBuilder>>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl LauncherServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            key_builder: None,
            listeners: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: LauncherConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_key_builder(mut self, key_builder: Arc<dyn KeyBuilder>) -> Self {
        self.key_builder = Some(key_builder);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Defaults: `LauncherConfig::default()` and the member-job key builder.
    pub fn build(self) -> Result<LauncherService> {
        let config = self.config.unwrap_or_default();
        let key_builder = self
            .key_builder
            .unwrap_or_else(|| Arc::new(DefaultKeyBuilder::member_job()));
        LauncherService::start(config, key_builder, self.listeners)
    }
}

impl Default for LauncherServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
