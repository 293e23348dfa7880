//! Request intake: turns a member launch request into run parameters and maps
//! the launch outcome to a transport-level acknowledgement.
//!
//! Transport-neutral; an HTTP handler would call `handle_json` with the
//! request body and answer with `http_status()` and the serialized response.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::errors::LaunchError;
use crate::launch::{BoxedJob, LaunchAccepted, LaunchCoordinator, RunKey, RunParameters};

/// Acknowledgement text for an accepted launch. The job has only been queued.
pub const ACCEPTED_MESSAGE: &str = "batch completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberLaunchRequest {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Accepted,
    BadRequest,
    Conflict,
    Unavailable,
    InternalError,
}

impl AckStatus {
    pub fn http_status(self) -> u16 {
        match self {
            AckStatus::Accepted => 202,
            AckStatus::BadRequest => 400,
            AckStatus::Conflict => 409,
            AckStatus::Unavailable => 503,
            AckStatus::InternalError => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchResponse {
    pub status: AckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<RunKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
}

impl LaunchResponse {
    pub fn http_status(&self) -> u16 {
        self.status.http_status()
    }

    fn accepted(accepted: LaunchAccepted) -> Self {
        Self {
            status: AckStatus::Accepted,
            message: ACCEPTED_MESSAGE.to_string(),
            key: Some(accepted.key),
            execution_id: Some(accepted.execution_id),
        }
    }

    fn rejected(err: LaunchError) -> Self {
        let (status, key) = match &err {
            LaunchError::Validation { .. } => (AckStatus::BadRequest, None),
            LaunchError::DuplicateRun { key, .. } | LaunchError::AlreadyComplete { key } => {
                (AckStatus::Conflict, Some(key.clone()))
            }
            LaunchError::QueueFull { .. } | LaunchError::ShuttingDown => {
                (AckStatus::Unavailable, None)
            }
            LaunchError::Configuration { .. } | LaunchError::Internal { .. } => {
                (AckStatus::InternalError, None)
            }
        };
        Self {
            status,
            message: err.to_string(),
            key,
            execution_id: None,
        }
    }
}

/// Builds the parameter set for a member launch: the member id plus the
/// request time at millisecond precision.
pub fn member_parameters(id: &str, now: DateTime<Utc>) -> RunParameters {
    RunParameters::builder()
        .add_string("id", id)
        .add_date("date", now.trunc_subsecs(3))
        .build()
}

pub type JobFactory = Arc<dyn Fn() -> BoxedJob + Send + Sync>;

/// Launches one job body per member request.
#[derive(Clone)]
pub struct MemberJobLauncher {
    coordinator: LaunchCoordinator,
    job_factory: JobFactory,
}

impl MemberJobLauncher {
    pub fn new<F>(coordinator: LaunchCoordinator, job_factory: F) -> Self
    where
        F: Fn() -> BoxedJob + Send + Sync + 'static,
    {
        Self {
            coordinator,
            job_factory: Arc::new(job_factory),
        }
    }

    pub fn handle(&self, request: MemberLaunchRequest) -> LaunchResponse {
        self.handle_at(request, Utc::now())
    }

    /// Same as `handle`, with an explicit request time
    pub fn handle_at(&self, request: MemberLaunchRequest, now: DateTime<Utc>) -> LaunchResponse {
        let params = member_parameters(&request.id, now);
        match self.coordinator.launch(params, (self.job_factory)()) {
            Ok(accepted) => LaunchResponse::accepted(accepted),
            Err(err) => LaunchResponse::rejected(err),
        }
    }

    /// Parse a JSON body like `{"id": "member-42"}` and launch.
    pub fn handle_json(&self, body: &str) -> LaunchResponse {
        match serde_json::from_str::<MemberLaunchRequest>(body) {
            Ok(request) => self.handle(request),
            Err(e) => LaunchResponse::rejected(LaunchError::validation(format!(
                "malformed request body: {}",
                e
            ))),
        }
    }

    pub fn coordinator(&self) -> &LaunchCoordinator {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::{
        job_fn, DefaultKeyBuilder, ExecutionRegistry, ExecutionStatus, WorkerPool,
        WorkerPoolConfig,
    };
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn launcher() -> MemberJobLauncher {
        let registry = Arc::new(ExecutionRegistry::new());
        let pool = WorkerPool::start(
            Arc::clone(&registry),
            WorkerPoolConfig {
                workers: 2,
                queue_capacity: 8,
            },
            vec![],
        )
        .unwrap();
        let coordinator = LaunchCoordinator::new(
            Arc::new(DefaultKeyBuilder::member_job()),
            registry,
            Arc::new(pool),
        );
        MemberJobLauncher::new(coordinator, || {
            job_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
        })
    }

    #[test]
    fn test_member_parameters_truncate_to_millis() {
        let now = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let params = member_parameters("member-42", now);
        assert_eq!(params.get_string("id"), Some("member-42"));
        assert_eq!(
            params.get_date("date"),
            Some(Utc.timestamp_opt(1_700_000_000, 123_000_000).unwrap())
        );
    }

    #[tokio::test]
    async fn test_accepted_then_conflict() {
        let launcher = launcher();
        let now = Utc::now();
        let request = MemberLaunchRequest {
            id: "member-42".to_string(),
        };

        let first = launcher.handle_at(request.clone(), now);
        assert_eq!(first.status, AckStatus::Accepted);
        assert_eq!(first.message, ACCEPTED_MESSAGE);
        assert_eq!(first.http_status(), 202);

        let second = launcher.handle_at(request, now);
        assert_eq!(second.status, AckStatus::Conflict);
        assert_eq!(second.http_status(), 409);
        assert_eq!(second.key, first.key);
    }

    #[tokio::test]
    async fn test_blank_id_is_bad_request() {
        let launcher = launcher();
        let response = launcher.handle(MemberLaunchRequest { id: " ".to_string() });
        assert_eq!(response.status, AckStatus::BadRequest);
        assert!(launcher.coordinator().registry().is_empty());
    }

    #[tokio::test]
    async fn test_handle_json() {
        let launcher = launcher();

        let ok = launcher.handle_json(r#"{"id": "member-1"}"#);
        assert_eq!(ok.status, AckStatus::Accepted);

        let malformed = launcher.handle_json(r#"{"member": 1}"#);
        assert_eq!(malformed.http_status(), 400);
        assert!(malformed.message.contains("malformed request body"));

        let key = ok.key.unwrap();
        assert!(launcher.coordinator().pool().shutdown(Duration::from_secs(5)).await);
        assert_eq!(
            launcher.coordinator().status(&key).unwrap().status,
            ExecutionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_unavailable() {
        let launcher = launcher();
        assert!(launcher.coordinator().pool().shutdown(Duration::from_secs(1)).await);
        let response = launcher.handle(MemberLaunchRequest {
            id: "member-5".to_string(),
        });
        assert_eq!(response.status, AckStatus::Unavailable);
        assert_eq!(response.http_status(), 503);
    }

    #[test]
    fn test_response_json() {
        let response = LaunchResponse::rejected(LaunchError::ShuttingDown);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "unavailable", "message": "Launcher is shutting down"})
        );
    }
}
