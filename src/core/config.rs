use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::errors::{LaunchError, Result};
use crate::launch::registry::RerunPolicy;

/// Launcher configuration with all tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    // Worker pool configuration
    /// Maximum number of job bodies running at once
    pub workers: usize,
    /// Maximum number of accepted job bodies waiting for a worker
    pub queue_capacity: usize,
    /// How long `shutdown` waits for in-flight job bodies
    pub shutdown_grace: Duration,

    // Registry configuration
    /// How long finished execution records are kept
    pub retention: Duration,
    /// Interval between retention sweeps
    pub sweep_interval: Duration,
    /// Whether completed runs may be launched again
    pub rerun_policy: RerunPolicy,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            workers: cpu_count.max(1),
            queue_capacity: 1024,
            shutdown_grace: Duration::from_secs(5),
            retention: Duration::from_secs(3600), // 1 hour
            sweep_interval: Duration::from_secs(30),
            rerun_policy: RerunPolicy::Always,
        }
    }
}

impl LauncherConfig {
    /// Create a new builder for LauncherConfig
    pub fn builder() -> LauncherConfigBuilder {
        LauncherConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LaunchError::configuration("workers must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(LaunchError::configuration(
                "queue_capacity must be greater than 0",
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(LaunchError::configuration(
                "sweep_interval must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Create a configuration suited to development and tests
    pub fn development() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            shutdown_grace: Duration::from_secs(1),
            retention: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Parse a configuration from YAML; missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }
}

/// Builder for LauncherConfig
pub struct LauncherConfigBuilder {
    config: LauncherConfig,
}

impl LauncherConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: LauncherConfig::default(),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Set retention window and sweep interval
    pub fn retention(mut self, retention: Duration, sweep_interval: Duration) -> Self {
        self.config.retention = retention;
        self.config.sweep_interval = sweep_interval;
        self
    }

    pub fn rerun_policy(mut self, policy: RerunPolicy) -> Self {
        self.config.rerun_policy = policy;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<LauncherConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for LauncherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LauncherConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.workers >= 1);
        assert_eq!(config.rerun_policy, RerunPolicy::Always);
    }

    #[test]
    fn test_development_config() {
        let config = LauncherConfig::development();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = LauncherConfig::default();

        config.workers = 0;
        assert!(config.validate().is_err());
        config.workers = 2;

        config.queue_capacity = 0;
        assert!(config.validate().is_err());
        config.queue_capacity = 8;

        config.sweep_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(LaunchError::Configuration { .. })
        ));
    }

    #[test]
    fn test_builder() {
        let config = LauncherConfig::builder()
            .workers(8)
            .queue_capacity(32)
            .retention(Duration::from_secs(120), Duration::from_secs(10))
            .rerun_policy(RerunPolicy::FailedOnly)
            .build()
            .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.retention, Duration::from_secs(120));
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.rerun_policy, RerunPolicy::FailedOnly);
    }

    #[test]
    fn test_builder_rejects_invalid() {
        assert!(LauncherConfig::builder().workers(0).build().is_err());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
workers: 3
queue_capacity: 10
rerun_policy: failed_only
retention:
  secs: 90
  nanos: 0
"#;
        let config = LauncherConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.retention, Duration::from_secs(90));
        assert_eq!(config.rerun_policy, RerunPolicy::FailedOnly);
        assert_eq!(config.sweep_interval, LauncherConfig::default().sweep_interval);
    }

    #[test]
    fn test_from_yaml_invalid() {
        assert!(matches!(
            LauncherConfig::from_yaml_str("workers: 0"),
            Err(LaunchError::Configuration { .. })
        ));
        assert!(LauncherConfig::from_yaml_str("workers: [").is_err());
    }
}
