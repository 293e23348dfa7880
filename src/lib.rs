pub mod core; // Config, errors, tracing setup
pub mod launch; // Run identity, admission, worker pool, execution registry
pub mod intake; // Member request adapter
pub mod service; // Component assembly

// Re-exports for convenience
pub use crate::core::config::{LauncherConfig, LauncherConfigBuilder};
pub use crate::core::errors::{LaunchError, Result};
pub use crate::core::telemetry::init_tracing;
pub use intake::{AckStatus, LaunchResponse, MemberJobLauncher, MemberLaunchRequest};
pub use launch::*;
pub use service::{LauncherService, LauncherServiceBuilder};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_member_launch_round_trip() {
        let service = LauncherService::builder()
            .with_config(LauncherConfig::development())
            .build()
            .unwrap();
        let launcher = MemberJobLauncher::new(service.coordinator().clone(), || {
            job_fn(|ctx: JobContext| async move {
                tracing::info!(member = ?ctx.parameters.get_string("id"), "processing member");
                Ok(())
            })
        });

        let response = launcher.handle(MemberLaunchRequest {
            id: "member-1".to_string(),
        });
        assert_eq!(response.status, AckStatus::Accepted);

        let key = response.key.clone().unwrap();
        let registry = Arc::clone(service.registry());
        let mut completed = false;
        for _ in 0..50 {
            if registry.get(&key).map(|r| r.status) == Some(ExecutionStatus::Completed) {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(completed, "Job did not complete in time");
        assert!(service.shutdown().await);
    }
}
