//! Composes lifecycle, dispatcher, and coordinator into one long-lived
//! worker with a task-type -> handler dispatch table.
//!
//! Concrete QE capabilities (test generation, security scanning, ...) are
//! registered as [`TaskTypeHandler`] implementations rather than expressed
//! as agent subtypes: all variation is through composed strategies plus
//! this dispatch table, not subtype polymorphism.

pub mod handlers;
#[cfg(test)]
mod tests;

use crate::coordinator::Coordinator;
use crate::dispatcher::{CancellationToken, TaskDispatcher, TaskHandler};
use crate::error::{FleetError, Result};
use crate::lifecycle::LifecycleManager;
use crate::memory::MemoryStore;
use crate::models::{AgentStatus, Severity, Task, TaskOutcome, TaskResult};
use crate::pattern_store::PatternStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Context handed to every [`TaskTypeHandler`] invocation: the shared
/// coordination surfaces a handler needs to do its work and report events.
pub struct HandlerContext {
    pub coordinator: Arc<Coordinator>,
    pub pattern_store: Arc<PatternStore>,
    pub memory: Arc<dyn MemoryStore>,
}

/// A concrete QE capability, registered against one or more task types.
#[async_trait]
pub trait TaskTypeHandler: Send + Sync {
    async fn handle(
        &self,
        task: &Task,
        cancel: CancellationToken,
        ctx: &HandlerContext,
    ) -> Result<serde_json::Value>;
}

pub struct AgentShell {
    pub lifecycle: Arc<LifecycleManager>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub coordinator: Arc<Coordinator>,
    handlers: RwLock<HashMap<String, Arc<dyn TaskTypeHandler>>>,
    context: HandlerContext,
}

impl AgentShell {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        dispatcher: Arc<TaskDispatcher>,
        coordinator: Arc<Coordinator>,
        pattern_store: Arc<PatternStore>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        let context = HandlerContext {
            coordinator: coordinator.clone(),
            pattern_store,
            memory,
        };
        Self {
            lifecycle,
            dispatcher,
            coordinator,
            handlers: RwLock::new(HashMap::new()),
            context,
        }
    }

    pub async fn register_handler(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskTypeHandler>,
    ) {
        self.handlers.write().await.insert(task_type.into(), handler);
    }

    /// Registers the bundled handlers: test generation, security scanning,
    /// and gate enforcement.
    pub async fn register_default_handlers(&self) {
        self.register_handler("generate_tests", Arc::new(handlers::GenerateTestsHandler))
            .await;
        self.register_handler("security_scan", Arc::new(handlers::SecurityScanHandler))
            .await;
        self.register_handler(
            "enforce_security_gate",
            Arc::new(handlers::EnforceSecurityGateHandler),
        )
        .await;
    }

    pub async fn submit(&self, task: Task) -> Result<String> {
        self.dispatcher.submit(task).await
    }

    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        self.dispatcher.cancel(task_id).await
    }

    pub async fn pattern_count(&self) -> usize {
        self.context.pattern_store.len().await
    }

    /// Forms and runs one batch, bracketing it with a single `busy`/`idle`
    /// transition regardless of batch size (per-task `AgentStats` are still
    /// updated for every result). Returns an empty vec if nothing was
    /// eligible to dispatch.
    pub async fn run_once(self: &Arc<Self>) -> Result<Vec<TaskResult>> {
        if self.dispatcher.queue_length().await == 0 {
            return Ok(Vec::new());
        }

        self.lifecycle.transition(AgentStatus::Busy).await?;
        let handler: Arc<dyn TaskHandler> = self.clone();
        let (results, _efficiency) = self.dispatcher.run_batch(handler).await;

        let mut internal_failure = None;
        for result in &results {
            let success = matches!(result.outcome, TaskOutcome::Success { .. });
            self.lifecycle
                .record_task_outcome(success, result.duration_secs)
                .await;
            if let TaskOutcome::Failure { kind, message } = &result.outcome {
                if *kind == crate::error::ErrorKind::Internal {
                    internal_failure = Some((result.task_id.clone(), message.clone()));
                }
            }
        }

        if let Some((task_id, message)) = internal_failure {
            self.lifecycle.transition(AgentStatus::Failed).await?;
            self.coordinator
                .emit_event(
                    "task.failed",
                    serde_json::json!({ "task_id": task_id, "message": message }),
                    Severity::Critical,
                )
                .await?;
        } else {
            self.lifecycle.transition(AgentStatus::Idle).await?;
        }
        Ok(results)
    }

    /// Drains the queue, running batches until one comes back empty.
    pub async fn run_until_drained(self: &Arc<Self>) -> Result<Vec<TaskResult>> {
        let mut all = Vec::new();
        loop {
            let results = self.run_once().await?;
            if results.is_empty() {
                break;
            }
            all.extend(results);
        }
        Ok(all)
    }
}

#[async_trait]
impl TaskHandler for AgentShell {
    async fn perform_task(
        &self,
        task: &Task,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value> {
        let handler = self.handlers.read().await.get(&task.task_type).cloned();
        let handler = handler.ok_or_else(|| {
            FleetError::Validation(format!(
                "no handler registered for task type '{}'",
                task.task_type
            ))
        })?;
        handler.handle(task, cancel, &self.context).await
    }
}
