//! In-process queue registry
//!
//! `JobRepository` owns one queue per [`QueueName`]. Each queue keeps its
//! own pause flag, concurrency limit, pending jobs and counters behind a
//! mutex; handlers run as Tokio tasks and report back when they finish.
//! The repository is a cheap handle (`Clone`) and must be used from inside
//! a Tokio runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::jobs::{JobItem, QueueName};
use crate::types::{AppError, AppResult};

/// Async function bound to a queue. `Ok(true)` marks the job completed;
/// `Ok(false)` and `Err(_)` both mark it failed. Failed jobs are not retried.
#[async_trait]
pub trait JobItemHandler: Send + Sync {
    async fn handle(&self, item: JobItem) -> anyhow::Result<bool>;
}

#[async_trait]
impl<F, Fut> JobItemHandler for F
where
    F: Fn(JobItem) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    async fn handle(&self, item: JobItem) -> anyhow::Result<bool> {
        (self)(item).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub waiting: u64,
    /// Waiting jobs held back by a pause. Equal to `waiting` while the
    /// queue is paused and zero otherwise.
    pub paused: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub is_active: bool,
    pub is_paused: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobOptions {
    /// Hold the job in `delayed` for this long before it becomes waiting.
    pub delay: Option<Duration>,
}

struct QueuedJob {
    id: Uuid,
    item: JobItem,
    enqueued_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    paused: bool,
    concurrency: u32,
    handler: Option<Arc<dyn JobItemHandler>>,
    waiting: VecDeque<QueuedJob>,
    delayed: HashMap<Uuid, QueuedJob>,
    active: u32,
    completed: u64,
    failed: u64,
}

impl QueueState {
    /// Move as many waiting jobs to active as pause state and concurrency
    /// allow. Nothing starts until a handler is bound.
    fn take_ready(&mut self) -> Vec<(QueuedJob, Arc<dyn JobItemHandler>)> {
        let Some(handler) = self.handler.clone() else {
            return Vec::new();
        };

        let mut ready = Vec::new();
        while !self.paused && self.active < self.concurrency {
            let Some(job) = self.waiting.pop_front() else {
                break;
            };
            self.active += 1;
            ready.push((job, Arc::clone(&handler)));
        }
        ready
    }

    fn counts(&self) -> JobCounts {
        let waiting = self.waiting.len() as u64;
        JobCounts {
            active: u64::from(self.active),
            completed: self.completed,
            failed: self.failed,
            delayed: self.delayed.len() as u64,
            waiting,
            paused: if self.paused { waiting } else { 0 },
        }
    }
}

struct Registry {
    queues: [Mutex<QueueState>; QueueName::COUNT],
}

impl Registry {
    fn lock(&self, queue: QueueName) -> MutexGuard<'_, QueueState> {
        // A poisoned queue only means a panic happened between two counter
        // updates; the state is still usable.
        self.queues[queue.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn pump(self: &Arc<Self>, queue: QueueName) {
        let ready = self.lock(queue).take_ready();
        for (job, handler) in ready {
            self.run(queue, job, handler);
        }
    }

    fn run(self: &Arc<Self>, queue: QueueName, job: QueuedJob, handler: Arc<dyn JobItemHandler>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let QueuedJob { id, item, enqueued_at } = job;
            let name = item.name();
            let waited_ms = (Utc::now() - enqueued_at).num_milliseconds();
            debug!(%queue, job = %name, %id, waited_ms, "Starting job");

            let outcome = AssertUnwindSafe(handler.handle(item)).catch_unwind().await;
            let succeeded = match outcome {
                Ok(Ok(true)) => {
                    debug!(%queue, job = %name, %id, "Job completed");
                    true
                }
                Ok(Ok(false)) => {
                    warn!(%queue, job = %name, %id, "Job reported failure");
                    false
                }
                Ok(Err(e)) => {
                    error!(%queue, job = %name, %id, error = ?e, "Job failed");
                    false
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(%queue, job = %name, %id, panic = %message, "Job handler panicked");
                    false
                }
            };

            registry.finish(queue, succeeded);
        });
    }

    fn finish(self: &Arc<Self>, queue: QueueName, succeeded: bool) {
        {
            let mut state = self.lock(queue);
            state.active = state.active.saturating_sub(1);
            if succeeded {
                state.completed += 1;
            } else {
                state.failed += 1;
            }
        }
        self.pump(queue);
    }

    fn promote(self: &Arc<Self>, queue: QueueName, id: Uuid) {
        {
            let mut state = self.lock(queue);
            // Gone if the queue was emptied while the job was delayed.
            let Some(job) = state.delayed.remove(&id) else {
                return;
            };
            state.waiting.push_back(job);
        }
        self.pump(queue);
    }
}

/// Registry of every queue, their handlers and counters.
#[derive(Clone)]
pub struct JobRepository {
    registry: Arc<Registry>,
}

/// Non-owning handle for handlers that are stored inside the registry.
#[derive(Clone)]
pub struct WeakJobRepository {
    registry: Weak<Registry>,
}

impl WeakJobRepository {
    pub fn upgrade(&self) -> Option<JobRepository> {
        self.registry.upgrade().map(|registry| JobRepository { registry })
    }
}

impl JobRepository {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                queues: std::array::from_fn(|_| Mutex::new(QueueState::default())),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakJobRepository {
        WeakJobRepository {
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Bind the handler for `queue`. Each queue takes exactly one handler;
    /// binding a second one is rejected. Jobs queued before binding start
    /// right away.
    pub fn add_handler<H>(&self, queue: QueueName, concurrency: u32, handler: H) -> AppResult<()>
    where
        H: JobItemHandler + 'static,
    {
        {
            let mut state = self.registry.lock(queue);
            if state.handler.is_some() {
                return Err(AppError::HandlerAlreadyBound(queue));
            }
            state.handler = Some(Arc::new(handler));
            state.concurrency = concurrency;
        }

        info!(%queue, concurrency, "Registered queue handler");
        self.registry.pump(queue);
        Ok(())
    }

    /// Change how many jobs `queue` may run at once. Running jobs are never
    /// interrupted; a lower limit only holds back new ones.
    pub fn set_concurrency(&self, queue: QueueName, concurrency: u32) {
        {
            let mut state = self.registry.lock(queue);
            if state.concurrency == concurrency {
                return;
            }
            debug!(%queue, from = state.concurrency, to = concurrency, "Updating queue concurrency");
            state.concurrency = concurrency;
        }
        self.registry.pump(queue);
    }

    pub fn get_concurrency(&self, queue: QueueName) -> u32 {
        self.registry.lock(queue).concurrency
    }

    /// Accept `item` into its queue's waiting set. Returns as soon as the job
    /// is queued, not when it runs.
    pub async fn queue(&self, item: JobItem) -> AppResult<()> {
        self.queue_with_options(item, JobOptions::default()).await
    }

    pub async fn queue_all(&self, items: Vec<JobItem>) -> AppResult<()> {
        for item in items {
            self.queue(item).await?;
        }
        Ok(())
    }

    pub async fn queue_with_options(&self, item: JobItem, options: JobOptions) -> AppResult<()> {
        let queue = item.queue();
        let job = QueuedJob {
            id: Uuid::new_v4(),
            item,
            enqueued_at: Utc::now(),
        };
        debug!(%queue, job = %job.item.name(), id = %job.id, "Queued job");

        match options.delay.filter(|delay| !delay.is_zero()) {
            None => {
                self.registry.lock(queue).waiting.push_back(job);
                self.registry.pump(queue);
            }
            Some(delay) => {
                let id = job.id;
                self.registry.lock(queue).delayed.insert(id, job);

                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    registry.promote(queue, id);
                });
            }
        }

        Ok(())
    }

    /// Stop starting new jobs on `queue`. Running jobs finish normally.
    pub async fn pause(&self, queue: QueueName) -> AppResult<()> {
        let mut state = self.registry.lock(queue);
        if !state.paused {
            state.paused = true;
            info!(%queue, "Paused queue");
        }
        Ok(())
    }

    pub async fn resume(&self, queue: QueueName) -> AppResult<()> {
        {
            let mut state = self.registry.lock(queue);
            if !state.paused {
                return Ok(());
            }
            state.paused = false;
            info!(%queue, "Resumed queue");
        }
        self.registry.pump(queue);
        Ok(())
    }

    /// Drop every job on `queue` that has not started yet, delayed ones
    /// included. Active jobs are left alone.
    pub async fn empty(&self, queue: QueueName) -> AppResult<()> {
        let mut state = self.registry.lock(queue);
        let dropped = state.waiting.len() + state.delayed.len();
        state.waiting.clear();
        state.delayed.clear();
        info!(%queue, dropped, "Emptied queue");
        Ok(())
    }

    pub async fn get_queue_status(&self, queue: QueueName) -> AppResult<QueueStatus> {
        let state = self.registry.lock(queue);
        Ok(QueueStatus {
            is_active: state.active > 0,
            is_paused: state.paused,
        })
    }

    pub async fn get_job_counts(&self, queue: QueueName) -> AppResult<JobCounts> {
        Ok(self.registry.lock(queue).counts())
    }
}

impl Default for JobRepository {
    fn default() -> Self {
        Self::new()
    }
}
