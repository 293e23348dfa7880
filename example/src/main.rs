use anyhow::{anyhow, Result};
use batch_launch::{
    init_tracing, job_fn, ExecutionStatus, JobContext, JobError, LauncherConfig,
    LauncherService, LoggingListener, MemberJobLauncher,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// Stand-in for the per-member batch work
async fn process_member(ctx: JobContext) -> Result<(), JobError> {
    let member = ctx
        .parameters
        .get_string("id")
        .ok_or_else(|| JobError::new("missing member id"))?
        .to_string();

    info!(%member, attempt = ctx.attempt, "Processing member batch");
    tokio::time::sleep(Duration::from_millis(200)).await;

    if member.starts_with("fail") {
        return Err(JobError::new(format!("member {} could not be processed", member)));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    let config = match std::env::var("LAUNCHER_CONFIG") {
        Ok(path) => LauncherConfig::from_yaml_file(path)?,
        Err(_) => LauncherConfig::development(),
    };

    let service = LauncherService::builder()
        .with_config(config)
        .with_listener(Arc::new(LoggingListener))
        .build()?;
    let launcher = MemberJobLauncher::new(service.coordinator().clone(), || {
        job_fn(process_member)
    });

    let ids: Vec<String> = std::env::args().skip(1).collect();
    let ids = if ids.is_empty() {
        vec!["member-42".to_string(), "member-42".to_string(), "fail-7".to_string()]
    } else {
        ids
    };

    let mut keys = Vec::new();
    for id in &ids {
        let body = serde_json::json!({ "id": id }).to_string();
        let response = launcher.handle_json(&body);
        println!(
            "{} -> {} {}",
            id,
            response.http_status(),
            serde_json::to_string(&response)?
        );
        if let Some(key) = response.key {
            keys.push(key);
        }
    }

    keys.sort();
    keys.dedup();
    for key in &keys {
        loop {
            let record = service
                .status(key)
                .ok_or_else(|| anyhow!("no record for key {}", key))?;
            if record.status.is_terminal() {
                println!(
                    "{} finished as {}{}",
                    key,
                    record.status,
                    record
                        .error
                        .map(|e| format!(" ({})", e))
                        .unwrap_or_default()
                );
                break;
            }
            if record.status == ExecutionStatus::Pending {
                info!(%key, "Waiting for a free worker");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    if !service.shutdown().await {
        return Err(anyhow!("worker pool did not drain within the grace period"));
    }
    Ok(())
}
