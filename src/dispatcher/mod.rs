//! Task dispatcher: priority queue, dependency-aware batch formation, retry
//! policy, and cooperative cancellation.

pub mod retry;

use crate::config::DispatcherConfig;
use crate::error::{ErrorKind, FleetError, Result};
use crate::models::{Task, TaskOutcome, TaskRecord, TaskResult, TaskState};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// A cooperative cancellation signal carrying an optional deadline.
/// Handlers must poll [`is_cancelled`](CancellationToken::is_cancelled) at
/// every suspension point.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    fn new(deadline: Option<Instant>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.is_past_deadline()
    }

    pub fn is_past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Implemented by the concrete agent; invoked by the dispatcher for every
/// dispatched task. `cancel` must be checked at every suspension point.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn perform_task(
        &self,
        task: &Task,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value>;
}

/// Per-batch observability metric: `Σ(task_durations) / (wall_time ×
/// max_parallelism)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchEfficiency {
    pub batch_size: usize,
    pub efficiency: f64,
}

struct QueuedTask {
    record: TaskRecord,
}

/// Priority-queue ordering: priority desc, submission time asc.
fn queue_cmp(a: &Task, b: &Task) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.submitted_at.cmp(&b.submitted_at))
}

pub struct TaskDispatcher {
    config: DispatcherConfig,
    queue: Mutex<Vec<QueuedTask>>,
    records: RwLock<HashMap<String, TaskRecord>>,
    results: RwLock<HashMap<String, TaskResult>>,
    tokens: RwLock<HashMap<String, CancellationToken>>,
    /// Ids in any terminal state (success, failure, or cancelled). A
    /// dependent's prerequisites are satisfied once listed here, regardless
    /// of outcome — otherwise a failed prerequisite would wedge every
    /// dependent forever.
    finished: RwLock<HashSet<String>>,
    event_bus: Option<Arc<crate::event_bus::EventBus>>,
    source_id: String,
}

impl TaskDispatcher {
    pub fn new(config: DispatcherConfig, source_id: impl Into<String>) -> Self {
        Self {
            config,
            queue: Mutex::new(Vec::new()),
            records: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            finished: RwLock::new(HashSet::new()),
            event_bus: None,
            source_id: source_id.into(),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<crate::event_bus::EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Enqueues `task`, rejecting it if the queue is already at capacity.
    pub async fn submit(&self, task: Task) -> Result<String> {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.config.max_queue_size {
            return Err(FleetError::QueueFull);
        }
        let task_id = task.id.clone();
        let record = TaskRecord::new(task);
        self.records
            .write()
            .await
            .insert(task_id.clone(), record.clone());
        queue.push(QueuedTask { record });
        queue.sort_by(|a, b| queue_cmp(&a.record.task, &b.record.task));
        Ok(task_id)
    }

    /// Cancels `task_id` if it is still pending or in progress. Returns
    /// whether it was in a cancellable state.
    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        if let Some(token) = self.tokens.read().await.get(task_id) {
            token.cancel();
            return Ok(true);
        }

        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|q| q.record.task.id != task_id);
        if queue.len() != before {
            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(task_id) {
                record.state = TaskState::Cancelled;
                record.updated_at = chrono::Utc::now();
            }
            self.finished.write().await.insert(task_id.to_string());
            self.results.write().await.insert(
                task_id.to_string(),
                TaskResult {
                    task_id: task_id.to_string(),
                    outcome: TaskOutcome::Cancelled,
                    duration_secs: 0.0,
                    retries_consumed: 0,
                    completed_at: chrono::Utc::now(),
                },
            );
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.records.read().await.get(task_id).map(|r| r.state)
    }

    pub async fn task_result(&self, task_id: &str) -> Option<TaskResult> {
        self.results.read().await.get(task_id).cloned()
    }

    pub async fn queue_length(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Pulls up to `max_parallel_tasks` eligible tasks off the queue. A
    /// task is eligible once every id in its `depends_on` is in the
    /// finished set, or it has no prerequisites. If nothing is eligible and
    /// the queue is non-empty, the head-of-queue task is dispatched anyway
    /// and a `dependency.cycle_or_stuck` diagnostic fires, favoring
    /// progress over strict correctness.
    async fn form_batch(&self) -> Vec<TaskRecord> {
        let finished = self.finished.read().await.clone();
        let mut queue = self.queue.lock().await;
        let mut batch = Vec::new();
        let mut remaining = Vec::new();

        for queued in queue.drain(..) {
            if batch.len() >= self.config.max_parallel_tasks {
                remaining.push(queued);
                continue;
            }
            let eligible = queued
                .record
                .task
                .depends_on
                .iter()
                .all(|dep| finished.contains(dep));
            if eligible {
                batch.push(queued.record);
            } else {
                remaining.push(queued);
            }
        }

        if batch.is_empty() && !remaining.is_empty() {
            remaining.sort_by(|a, b| queue_cmp(&a.record.task, &b.record.task));
            let stuck = remaining.remove(0);
            self.emit_stuck_diagnostic(&stuck.record.task.id).await;
            batch.push(stuck.record);
        }

        *queue = remaining;
        batch
    }

    async fn emit_stuck_diagnostic(&self, task_id: &str) {
        if let Some(bus) = &self.event_bus {
            let _ = bus
                .publish(
                    "dependency.cycle_or_stuck",
                    serde_json::json!({ "task_id": task_id }),
                    crate::models::Severity::Medium,
                    self.source_id.clone(),
                )
                .await;
        }
    }

    /// Forms and runs one batch to completion, returning each member's
    /// final result and the batch's parallel-efficiency metric.
    pub async fn run_batch(
        &self,
        handler: Arc<dyn TaskHandler>,
    ) -> (Vec<TaskResult>, Option<BatchEfficiency>) {
        let batch = self.form_batch().await;
        if batch.is_empty() {
            return (Vec::new(), None);
        }

        let wall_start = Instant::now();
        let mut handles = Vec::with_capacity(batch.len());
        for record in batch {
            let task_id = record.task.id.clone();
            let token = CancellationToken::new(
                record
                    .task
                    .deadline
                    .map(|d| {
                        let ms = (d - chrono::Utc::now()).num_milliseconds().max(0) as u64;
                        Instant::now() + Duration::from_millis(ms.min(self.config.timeout_ms))
                    })
                    .or_else(|| Some(Instant::now() + Duration::from_millis(self.config.timeout_ms))),
            );
            self.tokens.write().await.insert(task_id.clone(), token.clone());

            let handler = handler.clone();
            let task = record.task.clone();
            let config = self.config.clone();
            handles.push(tokio::spawn(async move {
                execute_with_retries(&task, handler, token, &config).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut duration_sum = 0.0;
        for handle in handles {
            let result = handle.await.unwrap_or_else(|e| TaskResult {
                task_id: "unknown".into(),
                outcome: TaskOutcome::Failure {
                    kind: ErrorKind::Internal,
                    message: format!("task panicked: {e}"),
                },
                duration_secs: 0.0,
                retries_consumed: 0,
                completed_at: chrono::Utc::now(),
            });
            duration_sum += result.duration_secs;
            self.finish(result.clone()).await;
            results.push(result);
        }

        let wall_time = wall_start.elapsed().as_secs_f64();
        let efficiency = if wall_time > 0.0 && self.config.max_parallel_tasks > 0 {
            Some(BatchEfficiency {
                batch_size: results.len(),
                efficiency: duration_sum / (wall_time * self.config.max_parallel_tasks as f64),
            })
        } else {
            None
        };

        (results, efficiency)
    }

    async fn finish(&self, result: TaskResult) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&result.task_id) {
            record.state = match &result.outcome {
                TaskOutcome::Success { .. } => TaskState::Completed,
                TaskOutcome::Failure { .. } => TaskState::Failed,
                TaskOutcome::Cancelled => TaskState::Cancelled,
            };
            record.retries_consumed = result.retries_consumed;
            record.updated_at = chrono::Utc::now();
        }
        self.finished.write().await.insert(result.task_id.clone());
        self.tokens.write().await.remove(&result.task_id);
        self.results.write().await.insert(result.task_id.clone(), result);
    }

    /// Removes completed/failed/cancelled records older than the
    /// configured retention window. Pending/in-progress tasks are never
    /// removed regardless of age.
    pub async fn cleanup(&self) -> usize {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(self.config.retention_hours);
        let mut records = self.records.write().await;
        let before = records.len();
        let mut results = self.results.write().await;
        let mut finished = self.finished.write().await;

        records.retain(|id, record| {
            let keep = record.updated_at > cutoff
                || matches!(record.state, TaskState::Pending | TaskState::InProgress);
            if !keep {
                results.remove(id);
                finished.remove(id);
            }
            keep
        });
        before - records.len()
    }
}

/// Runs `handler.perform_task` against `task`, retrying per the retry rule
/// table with exponential backoff up to `config.retry_attempts`.
async fn execute_with_retries(
    task: &Task,
    handler: Arc<dyn TaskHandler>,
    token: CancellationToken,
    config: &DispatcherConfig,
) -> TaskResult {
    let start = Instant::now();
    let mut retries_consumed = 0u32;

    loop {
        if token.is_cancelled() {
            return TaskResult {
                task_id: task.id.clone(),
                outcome: TaskOutcome::Cancelled,
                duration_secs: start.elapsed().as_secs_f64(),
                retries_consumed,
                completed_at: chrono::Utc::now(),
            };
        }

        let deadline = Duration::from_millis(config.timeout_ms);
        let attempt = tokio::time::timeout(deadline, handler.perform_task(task, token.clone())).await;

        let outcome_err = match attempt {
            Ok(Ok(payload)) => {
                return TaskResult {
                    task_id: task.id.clone(),
                    outcome: TaskOutcome::Success { payload },
                    duration_secs: start.elapsed().as_secs_f64(),
                    retries_consumed,
                    completed_at: chrono::Utc::now(),
                };
            }
            Ok(Err(e)) => e,
            Err(_) => FleetError::Timeout {
                message: format!("task {} exceeded {}ms", task.id, config.timeout_ms),
            },
        };

        let kind = outcome_err.kind();
        if kind == ErrorKind::Cancelled || token.is_cancelled() {
            return TaskResult {
                task_id: task.id.clone(),
                outcome: TaskOutcome::Cancelled,
                duration_secs: start.elapsed().as_secs_f64(),
                retries_consumed,
                completed_at: chrono::Utc::now(),
            };
        }

        let can_retry = retry::should_retry(kind) && retries_consumed < config.retry_attempts;
        if !can_retry {
            return TaskResult {
                task_id: task.id.clone(),
                outcome: TaskOutcome::Failure {
                    kind,
                    message: outcome_err.to_string(),
                },
                duration_secs: start.elapsed().as_secs_f64(),
                retries_consumed,
                completed_at: chrono::Utc::now(),
            };
        }

        let delay_ms = retry::backoff_delay_ms(
            config.retry_backoff_base_ms,
            config.retry_backoff_max_ms,
            retries_consumed,
        );
        retries_consumed += 1;
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}
