//! Launch coordinator - admission and dispatch of job runs
//!
//! The coordinator validates parameters, reserves the run identity in the
//! registry and hands the job body to the worker pool. It returns as soon as
//! the body is queued; the outcome is only visible through the registry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::errors::{LaunchError, Result};
use crate::launch::job::{BoxedJob, JobContext};
use crate::launch::key::{KeyBuilder, RunKey};
use crate::launch::params::RunParameters;
use crate::launch::pool::{WorkUnit, WorkerPool};
use crate::launch::registry::{AdmissionRejected, ExecutionRecord, ExecutionRegistry};

/// Acknowledgement of an admitted and queued run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchAccepted {
    pub key: RunKey,
    pub execution_id: Uuid,
    pub attempt: u32,
    pub admitted_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LaunchCoordinator {
    key_builder: Arc<dyn KeyBuilder>,
    registry: Arc<ExecutionRegistry>,
    pool: Arc<WorkerPool>,
}

impl LaunchCoordinator {
    pub fn new(
        key_builder: Arc<dyn KeyBuilder>,
        registry: Arc<ExecutionRegistry>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            key_builder,
            registry,
            pool,
        }
    }

    /// Admit `params` and queue `body` for execution.
    ///
    /// Never waits for the job body. Validation, duplicate and capacity
    /// failures are returned here; job body failures are not.
    pub fn launch(&self, params: RunParameters, body: BoxedJob) -> Result<LaunchAccepted> {
        let key = self.key_builder.build_key(&params)?;

        let admitted = match self.registry.try_admit(&key, &params) {
            Ok(admitted) => admitted,
            Err(AdmissionRejected::AlreadyRunning { status, .. }) => {
                info!(key = %key, status = %status, "Duplicate launch rejected");
                return Err(LaunchError::DuplicateRun { key, status });
            }
            Err(AdmissionRejected::AlreadyComplete { .. }) => {
                info!(key = %key, "Launch of completed run rejected");
                return Err(LaunchError::AlreadyComplete { key });
            }
        };

        let unit = WorkUnit {
            ctx: JobContext {
                execution_id: admitted.execution_id,
                key: key.clone(),
                parameters: params,
                attempt: admitted.attempt,
            },
            body,
        };

        if let Err(e) = self.pool.submit(unit) {
            // a refused run must not stay PENDING with nothing to run it
            self.registry.withdraw(&key, admitted.execution_id);
            warn!(key = %key, error = %e, "Launch withdrawn");
            return Err(e);
        }

        info!(
            key = %key,
            execution_id = %admitted.execution_id,
            attempt = admitted.attempt,
            "Launch accepted"
        );

        Ok(LaunchAccepted {
            key,
            execution_id: admitted.execution_id,
            attempt: admitted.attempt,
            admitted_at: admitted.admitted_at,
        })
    }

    pub fn status(&self, key: &RunKey) -> Option<ExecutionRecord> {
        self.registry.get(key)
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::job::job_fn;
    use crate::launch::key::DefaultKeyBuilder;
    use crate::launch::pool::WorkerPoolConfig;
    use crate::launch::registry::ExecutionStatus;
    use chrono::TimeZone;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn coordinator(workers: usize, queue_capacity: usize) -> LaunchCoordinator {
        let registry = Arc::new(ExecutionRegistry::new());
        let pool = WorkerPool::start(
            Arc::clone(&registry),
            WorkerPoolConfig {
                workers,
                queue_capacity,
            },
            vec![],
        )
        .unwrap();
        LaunchCoordinator::new(
            Arc::new(DefaultKeyBuilder::member_job()),
            registry,
            Arc::new(pool),
        )
    }

    fn member(id: &str) -> RunParameters {
        RunParameters::builder()
            .add_string("id", id)
            .add_date("date", Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap())
            .build()
    }

    #[tokio::test]
    async fn test_validation_does_not_touch_registry() {
        let coordinator = coordinator(1, 4);
        let params = RunParameters::builder().add_string("id", "member-1").build();

        let err = coordinator
            .launch(params, job_fn(|_| async { Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, LaunchError::Validation { .. }));
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_rejected_while_running() {
        let coordinator = coordinator(2, 4);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let accepted = coordinator
            .launch(
                member("member-1"),
                job_fn(|_| async move {
                    let _ = release_rx.await;
                    Ok(())
                }),
            )
            .unwrap();
        assert_eq!(accepted.attempt, 1);

        let err = coordinator
            .launch(member("member-1"), job_fn(|_| async { Ok(()) }))
            .unwrap_err();
        match err {
            LaunchError::DuplicateRun { key, status } => {
                assert_eq!(key, accepted.key);
                assert!(status.is_active());
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn test_refused_submission_is_withdrawn() {
        let coordinator = coordinator(1, 1);
        assert!(coordinator.pool().shutdown(Duration::from_secs(1)).await);

        let err = coordinator
            .launch(member("member-9"), job_fn(|_| async { Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, LaunchError::ShuttingDown));

        let key = DefaultKeyBuilder::member_job()
            .build_key(&member("member-9"))
            .unwrap();
        assert!(coordinator.status(&key).is_none());
    }

    #[tokio::test]
    async fn test_job_receives_parameters() {
        let coordinator = coordinator(1, 4);
        let (seen_tx, seen_rx) = oneshot::channel::<String>();

        let accepted = coordinator
            .launch(
                member("member-7"),
                job_fn(|ctx: JobContext| async move {
                    let id = ctx.parameters.get_string("id").unwrap_or_default().to_string();
                    let _ = seen_tx.send(id);
                    Ok(())
                }),
            )
            .unwrap();

        assert_eq!(seen_rx.await.unwrap(), "member-7");
        assert!(coordinator.pool().shutdown(Duration::from_secs(5)).await);
        assert_eq!(
            coordinator.status(&accepted.key).unwrap().status,
            ExecutionStatus::Completed
        );
    }
}
