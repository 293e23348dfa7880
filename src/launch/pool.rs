//! Worker pool: runs job bodies off the caller's task and reports their
//! terminal state back to the registry.
//!
//! A bounded queue feeds a single dispatcher task. The dispatcher takes a
//! semaphore permit per unit, so at most `workers` job bodies run at once, and
//! spawns each unit on its own tokio task. Every unit that was accepted by
//! `submit` ends up COMPLETED or FAILED in the registry, panics included. A
//! process crash leaves its record PENDING or RUNNING.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::errors::{LaunchError, Result};
use crate::launch::job::{BoxedJob, ExecutionListener, JobContext};
use crate::launch::registry::{ExecutionRegistry, TransitionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LaunchError::configuration("workers must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(LaunchError::configuration(
                "queue_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// A job body paired with the execution it belongs to
pub struct WorkUnit {
    pub ctx: JobContext,
    pub body: BoxedJob,
}

pub struct WorkerPool {
    sender: mpsc::Sender<WorkUnit>,
    config: WorkerPoolConfig,
    in_flight: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start the dispatcher. Must be called from within a tokio runtime.
    pub fn start(
        registry: Arc<ExecutionRegistry>,
        config: WorkerPoolConfig,
        listeners: Vec<Arc<dyn ExecutionListener>>,
    ) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher {
            receiver,
            shutdown_rx,
            semaphore: Arc::new(Semaphore::new(config.workers)),
            workers: config.workers,
            registry,
            listeners: listeners.into(),
            in_flight: Arc::clone(&in_flight),
        };
        let handle = tokio::spawn(dispatcher.run());

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            sender,
            config,
            in_flight,
            shutdown_tx,
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    /// Queue a unit without waiting. Fails when the queue is full or the pool
    /// is shutting down; the unit is dropped unrun in both cases.
    pub fn submit(&self, unit: WorkUnit) -> Result<()> {
        match self.sender.try_send(unit) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(unit)) => {
                warn!(key = %unit.ctx.key, "Worker queue full, rejecting job");
                Err(LaunchError::QueueFull {
                    capacity: self.config.queue_capacity,
                })
            }
            Err(TrySendError::Closed(unit)) => {
                warn!(key = %unit.ctx.key, "Worker pool closed, rejecting job");
                Err(LaunchError::ShuttingDown)
            }
        }
    }

    /// Job bodies currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Units accepted but not yet handed to a worker
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn config(&self) -> WorkerPoolConfig {
        self.config
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Stop accepting work, drain the queue and wait up to `grace` for running
    /// job bodies. Returns true if everything finished within `grace`; bodies
    /// still running after that keep running detached.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("Initiating worker pool shutdown");
        let _ = self.shutdown_tx.send(true);

        // A previous call already took the dispatcher
        let Some(handle) = self.dispatcher.lock().await.take() else {
            return self.in_flight() == 0;
        };

        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => {
                info!("Worker pool drained");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "Worker pool dispatcher failed");
                false
            }
            Err(_) => {
                warn!(
                    in_flight = self.in_flight(),
                    "Worker pool shutdown grace period elapsed"
                );
                false
            }
        }
    }
}

struct Dispatcher {
    receiver: mpsc::Receiver<WorkUnit>,
    shutdown_rx: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
    workers: usize,
    registry: Arc<ExecutionRegistry>,
    listeners: Arc<[Arc<dyn ExecutionListener>]>,
    in_flight: Arc<AtomicUsize>,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut closing = false;

        loop {
            tokio::select! {
                biased;
                changed = self.shutdown_rx.changed(), if !closing => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        // buffered units are still delivered after close
                        closing = true;
                        self.receiver.close();
                    }
                }
                unit = self.receiver.recv() => {
                    let Some(unit) = unit else { break };
                    let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                        break;
                    };

                    let registry = Arc::clone(&self.registry);
                    let listeners = Arc::clone(&self.listeners);
                    let guard = InFlightGuard::enter(Arc::clone(&self.in_flight), permit);

                    tokio::spawn(async move {
                        let _guard = guard;
                        run_one(unit, registry, listeners).await;
                    });
                }
            }
        }

        // Every permit back means every spawned unit finished.
        let _ = self.semaphore.acquire_many(self.workers as u32).await;
        debug!("Dispatcher stopped");
    }
}

/// Counts a spawned unit as in flight and holds its worker permit. Both are
/// released on drop, so an unwinding task still frees its slot.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl InFlightGuard {
    fn enter(in_flight: Arc<AtomicUsize>, permit: OwnedSemaphorePermit) -> Self {
        in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            in_flight,
            _permit: permit,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Execute a single unit and record its outcome
async fn run_one(
    unit: WorkUnit,
    registry: Arc<ExecutionRegistry>,
    listeners: Arc<[Arc<dyn ExecutionListener>]>,
) {
    let WorkUnit { ctx, body } = unit;
    let key = ctx.key.clone();

    if let TransitionOutcome::Stale(stale) = registry.mark_running(&key) {
        warn!(key = %key, execution_id = %ctx.execution_id, "Skipping job: {}", stale);
        return;
    }

    // A listener that panics before the body runs fails the execution.
    let mut listener_panic = None;
    for listener in listeners.iter() {
        let hook = AssertUnwindSafe(listener.before_job(&ctx)).catch_unwind().await;
        if let Err(panic) = hook {
            listener_panic = Some(panic_message(panic.as_ref()));
            break;
        }
    }

    if let Some(message) = listener_panic {
        let description = format!("execution listener panicked: {}", message);
        error!(key = %key, execution_id = %ctx.execution_id, "{}", description);
        registry.mark_failed(&key, description);
    } else {
        let result = AssertUnwindSafe(body.run(ctx.clone())).catch_unwind().await;

        match result {
            Ok(Ok(())) => {
                registry.mark_completed(&key);
            }
            Ok(Err(e)) => {
                let mut description = e.describe();
                if description.is_empty() {
                    description = "job body failed".to_string();
                }
                error!(key = %key, execution_id = %ctx.execution_id, error = %description, "Job body failed");
                registry.mark_failed(&key, description);
            }
            Err(panic) => {
                let description = format!("job body panicked: {}", panic_message(panic.as_ref()));
                error!(key = %key, execution_id = %ctx.execution_id, "{}", description);
                registry.mark_failed(&key, description);
            }
        }
    }

    if let Some(record) = registry.get(&key) {
        for listener in listeners.iter() {
            let hook = AssertUnwindSafe(listener.after_job(&record)).catch_unwind().await;
            if let Err(panic) = hook {
                warn!(
                    key = %key,
                    "Execution listener panicked after job: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
