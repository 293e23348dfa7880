//! Execution registry: in-memory map from run key to execution state.
//!
//! The registry is the only owner of `ExecutionRecord`s. Callers get clones,
//! and every mutation goes through one of the transition methods below.
//!
//! ## Status transitions
//!
//! - Pending → Running, Failed
//! - Running → Completed, Failed
//! - Completed, Failed → (terminal; replaced only by re-admission)
//!
//! `try_admit` is atomic per key: the check and the insert happen under the
//! key's shard lock, so two concurrent callers can never both see the key as
//! free. Unrelated keys in other shards never contend.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::launch::key::RunKey;
use crate::launch::params::RunParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Which terminal predecessors may be replaced by a new run of the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerunPolicy {
    /// Completed and failed runs may both be launched again
    #[default]
    Always,
    /// Only failed runs may be launched again
    FailedOnly,
}

/// Snapshot of one execution of a run key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub key: RunKey,
    pub parameters: RunParameters,
    /// 1 for the first execution of this key, +1 per retained predecessor
    pub attempt: u32,
    pub status: ExecutionStatus,
    /// Admission time
    pub started_at: DateTime<Utc>,
    pub running_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExecutionRecord {
    fn pending(key: RunKey, parameters: RunParameters, attempt: u32) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            key,
            parameters,
            attempt,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            running_at: None,
            finished_at: None,
            error: None,
        }
    }
}

/// Successful admission of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub execution_id: Uuid,
    pub attempt: u32,
    pub admitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionRejected {
    /// An execution of this key is pending or running
    AlreadyRunning {
        status: ExecutionStatus,
        execution_id: Uuid,
    },
    /// The key completed and the rerun policy forbids another run
    AlreadyComplete { execution_id: Uuid },
}

/// A transition that targeted a missing or finished record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleTransition {
    pub key: RunKey,
    pub attempted: ExecutionStatus,
    pub current: Option<ExecutionStatus>,
}

impl fmt::Display for StaleTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current {
            Some(current) => write!(
                f,
                "stale transition to {} for {} (currently {})",
                self.attempted, self.key, current
            ),
            None => write!(
                f,
                "stale transition to {} for {} (no record)",
                self.attempted, self.key
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The record was already in the requested non-terminal state
    Unchanged,
    Stale(StaleTransition),
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, TransitionOutcome::Stale(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Records removed by eviction since the registry was created
    pub evicted: u64,
}

#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    records: DashMap<RunKey, ExecutionRecord>,
    rerun_policy: RerunPolicy,
    evicted: AtomicU64,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rerun_policy(rerun_policy: RerunPolicy) -> Self {
        Self {
            rerun_policy,
            ..Self::default()
        }
    }

    pub fn rerun_policy(&self) -> RerunPolicy {
        self.rerun_policy
    }

    /// Atomically reserve `key` for a new execution.
    pub fn try_admit(
        &self,
        key: &RunKey,
        parameters: &RunParameters,
    ) -> Result<Admitted, AdmissionRejected> {
        let admitted = match self.records.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let record = ExecutionRecord::pending(key.clone(), parameters.clone(), 1);
                let admitted = admitted_from(&record);
                vacant.insert(record);
                admitted
            }
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if existing.status.is_active() {
                    return Err(AdmissionRejected::AlreadyRunning {
                        status: existing.status,
                        execution_id: existing.execution_id,
                    });
                }
                if existing.status == ExecutionStatus::Completed
                    && self.rerun_policy == RerunPolicy::FailedOnly
                {
                    return Err(AdmissionRejected::AlreadyComplete {
                        execution_id: existing.execution_id,
                    });
                }
                let record = ExecutionRecord::pending(
                    key.clone(),
                    parameters.clone(),
                    existing.attempt.saturating_add(1),
                );
                let admitted = admitted_from(&record);
                occupied.insert(record);
                admitted
            }
        };

        debug!(
            key = %key,
            execution_id = %admitted.execution_id,
            attempt = admitted.attempt,
            "Execution admitted"
        );
        Ok(admitted)
    }

    pub fn mark_running(&self, key: &RunKey) -> TransitionOutcome {
        self.transition(key, ExecutionStatus::Running, None)
    }

    pub fn mark_completed(&self, key: &RunKey) -> TransitionOutcome {
        self.transition(key, ExecutionStatus::Completed, None)
    }

    pub fn mark_failed(&self, key: &RunKey, error: impl Into<String>) -> TransitionOutcome {
        self.transition(key, ExecutionStatus::Failed, Some(error.into()))
    }

    fn transition(
        &self,
        key: &RunKey,
        target: ExecutionStatus,
        error: Option<String>,
    ) -> TransitionOutcome {
        let outcome = match self.records.get_mut(key) {
            None => TransitionOutcome::Stale(StaleTransition {
                key: key.clone(),
                attempted: target,
                current: None,
            }),
            Some(mut record) => {
                let now = Utc::now();
                match (record.status, target) {
                    (ExecutionStatus::Running, ExecutionStatus::Running) => {
                        TransitionOutcome::Unchanged
                    }
                    (ExecutionStatus::Pending, ExecutionStatus::Running) => {
                        record.status = ExecutionStatus::Running;
                        record.running_at = Some(now);
                        TransitionOutcome::Applied
                    }
                    (ExecutionStatus::Running, ExecutionStatus::Completed)
                    | (ExecutionStatus::Pending, ExecutionStatus::Failed)
                    | (ExecutionStatus::Running, ExecutionStatus::Failed) => {
                        record.status = target;
                        record.finished_at = Some(now);
                        record.error = error;
                        TransitionOutcome::Applied
                    }
                    (current, _) => TransitionOutcome::Stale(StaleTransition {
                        key: key.clone(),
                        attempted: target,
                        current: Some(current),
                    }),
                }
            }
        };

        match &outcome {
            TransitionOutcome::Stale(stale) => warn!(key = %key, "{}", stale),
            TransitionOutcome::Applied if target.is_terminal() => {
                info!(key = %key, status = %target, "Execution finished")
            }
            _ => {}
        }
        outcome
    }

    pub fn get(&self, key: &RunKey) -> Option<ExecutionRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Remove a still-pending admission of exactly this execution.
    pub fn withdraw(&self, key: &RunKey, execution_id: Uuid) -> bool {
        let removed = self
            .records
            .remove_if(key, |_, r| {
                r.execution_id == execution_id && r.status == ExecutionStatus::Pending
            })
            .is_some();
        if removed {
            debug!(key = %key, execution_id = %execution_id, "Admission withdrawn");
        }
        removed
    }

    /// Remove finished records whose `finished_at` is more than `window` ago.
    pub fn evict_older_than(&self, window: Duration) -> usize {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return 0;
        };
        match Utc::now().checked_sub_signed(window) {
            Some(cutoff) => self.evict_finished_before(cutoff),
            None => 0,
        }
    }

    /// Remove finished records with `finished_at` strictly before `cutoff`.
    /// Pending and running records are never evicted.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0usize;
        self.records.retain(|_, record| {
            let expired = record.status.is_terminal()
                && record.finished_at.map_or(false, |finished| finished < cutoff);
            if expired {
                removed += 1;
            }
            !expired
        });

        if removed > 0 {
            self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, cutoff = %cutoff, "Evicted finished executions");
        }
        removed
    }

    /// Clone all records, optionally only those in `status`.
    pub fn snapshot(&self, status: Option<ExecutionStatus>) -> Vec<ExecutionRecord> {
        self.records
            .iter()
            .filter(|entry| status.map_or(true, |s| entry.status == s))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            evicted: self.evicted.load(Ordering::Relaxed),
            ..Default::default()
        };
        for entry in self.records.iter() {
            match entry.status {
                ExecutionStatus::Pending => stats.pending += 1,
                ExecutionStatus::Running => stats.running += 1,
                ExecutionStatus::Completed => stats.completed += 1,
                ExecutionStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn admitted_from(record: &ExecutionRecord) -> Admitted {
    Admitted {
        execution_id: record.execution_id,
        attempt: record.attempt,
        admitted_at: record.started_at,
    }
}
