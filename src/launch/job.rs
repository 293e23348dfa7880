//! Job bodies and execution listeners.
//!
//! A job body is the opaque unit of work a launch runs. The launcher only
//! cares whether it returned normally or signalled failure.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use uuid::Uuid;

use crate::launch::key::RunKey;
use crate::launch::params::RunParameters;
use crate::launch::registry::ExecutionRecord;

/// Everything a job body may need to know about the execution it serves
#[derive(Debug, Clone)]
pub struct JobContext {
    pub execution_id: Uuid,
    pub key: RunKey,
    pub parameters: RunParameters,
    pub attempt: u32,
}

/// Failure signalled by a job body. Recorded on the execution, never
/// returned to the launching caller.
#[derive(Debug)]
pub struct JobError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Message followed by the source chain, for the execution record
    pub fn describe(&self) -> String {
        let mut out = self.message.clone();
        let mut source = self.source.as_deref().map(|s| s as &(dyn std::error::Error + 'static));
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::new(format!("{:#}", err))
    }
}

impl From<String> for JobError {
    fn from(s: String) -> Self {
        JobError::new(s)
    }
}

impl From<&str> for JobError {
    fn from(s: &str) -> Self {
        JobError::new(s)
    }
}

pub type JobResult = Result<(), JobError>;

/// Unit of work executed once on the worker pool.
#[async_trait]
pub trait JobBody: Send + 'static {
    async fn run(self: Box<Self>, ctx: JobContext) -> JobResult;
}

#[async_trait]
impl<F, Fut> JobBody for F
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn run(self: Box<Self>, ctx: JobContext) -> JobResult {
        (*self)(ctx).await
    }
}

pub type BoxedJob = Box<dyn JobBody>;

/// Box an async closure as a job body
pub fn job_fn<F, Fut>(f: F) -> BoxedJob
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    Box::new(f)
}

/// Observer of execution lifecycle. Listeners see state, they cannot change it.
#[async_trait]
pub trait ExecutionListener: Send + Sync {
    /// Called on the worker right before the job body runs
    async fn before_job(&self, _ctx: &JobContext) {}

    /// Called with the record after it reached a terminal state
    async fn after_job(&self, _record: &ExecutionRecord) {}
}

pub struct LoggingListener;

#[async_trait]
impl ExecutionListener for LoggingListener {
    async fn before_job(&self, ctx: &JobContext) {
        tracing::info!(
            key = %ctx.key,
            execution_id = %ctx.execution_id,
            attempt = ctx.attempt,
            "Job started with {}",
            ctx.parameters
        );
    }

    async fn after_job(&self, record: &ExecutionRecord) {
        match &record.error {
            Some(error) => tracing::error!(
                key = %record.key,
                execution_id = %record.execution_id,
                "Job {}: {}",
                record.status,
                error
            ),
            None => tracing::info!(
                key = %record.key,
                execution_id = %record.execution_id,
                "Job {}",
                record.status
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> JobContext {
        let parameters = RunParameters::builder().add_string("id", "m").build();
        JobContext {
            execution_id: Uuid::new_v4(),
            key: RunKey::derive(&parameters),
            parameters,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_closure_job_receives_context() {
        let job = job_fn(|ctx: JobContext| async move {
            if ctx.parameters.get_string("id") == Some("m") {
                Ok(())
            } else {
                Err(JobError::new("wrong parameters"))
            }
        });
        assert!(job.run(ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_closure_job_failure() {
        let job = job_fn(|_| async { Err::<(), _>(JobError::from("boom")) });
        let err = job.run(ctx()).await.unwrap_err();
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn test_describe_includes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = JobError::with_source("write failed", io);
        assert_eq!(err.describe(), "write failed: disk gone");
        assert_eq!(err.to_string(), "write failed");
    }

    #[test]
    fn test_from_anyhow_keeps_chain() {
        let err: JobError = anyhow::anyhow!("inner").context("outer").into();
        assert_eq!(err.message(), "outer: inner");
    }
}
