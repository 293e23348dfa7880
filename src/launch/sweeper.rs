use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::core::errors::{LaunchError, Result};
use crate::launch::registry::ExecutionRegistry;

/// Background task evicting finished executions past the retention window.
#[derive(Debug)]
pub struct RetentionSweeper {
    handle: Option<JoinHandle<()>>,
    is_shutdown: Arc<AtomicBool>,
}

impl RetentionSweeper {
    /// Spawn the sweep loop. Must be called from within a tokio runtime.
    pub fn start(
        registry: Arc<ExecutionRegistry>,
        retention: Duration,
        sweep_interval: Duration,
    ) -> Result<Self> {
        if sweep_interval.is_zero() {
            return Err(LaunchError::configuration(
                "sweep_interval must be greater than 0",
            ));
        }

        let is_shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&is_shutdown);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while !flag.load(Ordering::Relaxed) {
                ticker.tick().await;
                let evicted = registry.evict_older_than(retention);
                if evicted > 0 {
                    debug!(evicted, remaining = registry.len(), "Retention sweep");
                }
            }

            info!("Retention sweeper terminated");
        });

        Ok(Self {
            handle: Some(handle),
            is_shutdown,
        })
    }

    pub fn stop(&mut self) {
        self.is_shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::key::RunKey;
    use crate::launch::params::RunParameters;

    #[tokio::test]
    async fn test_sweeper_evicts_finished() {
        let registry = Arc::new(ExecutionRegistry::new());
        let params = RunParameters::builder().add_string("id", "a").build();
        let key = RunKey::derive(&params);
        registry.try_admit(&key, &params).unwrap();
        registry.mark_running(&key);
        registry.mark_completed(&key);

        let active_params = RunParameters::builder().add_string("id", "b").build();
        let active = RunKey::derive(&active_params);
        registry.try_admit(&active, &active_params).unwrap();

        let _sweeper = RetentionSweeper::start(
            Arc::clone(&registry),
            Duration::from_millis(20),
            Duration::from_millis(10),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(registry.get(&key).is_none());
        assert!(registry.get(&active).is_some());
    }

    #[tokio::test]
    async fn test_stop() {
        let registry = Arc::new(ExecutionRegistry::new());
        let mut sweeper = RetentionSweeper::start(
            Arc::clone(&registry),
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .unwrap();
        assert!(sweeper.is_running());
        sweeper.stop();
        assert!(!sweeper.is_running());

        // Finished after the stop: a live sweeper would evict it within a few ticks
        let params = RunParameters::builder().add_string("id", "kept").build();
        let key = RunKey::derive(&params);
        registry.try_admit(&key, &params).unwrap();
        registry.mark_running(&key);
        registry.mark_completed(&key);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.get(&key).is_some());
        assert_eq!(registry.stats().evicted, 0);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let registry = Arc::new(ExecutionRegistry::new());
        assert!(RetentionSweeper::start(registry, Duration::from_secs(1), Duration::ZERO).is_err());
    }
}
