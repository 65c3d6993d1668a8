//! Agent lifecycle state machine.
//!
//! Transitions are enforced here rather than left to callers: every
//! mutation goes through [`LifecycleManager::transition`], which rejects
//! anything outside the legal graph:
//!
//! ```text
//! uninitialized -> initializing -> idle
//! idle <-> busy
//! idle -> paused -> idle
//! any_non_terminal -> terminating -> terminated
//! any_non_terminal -> failed
//! ```


use crate::error::{FleetError, Result};
use crate::models::{AgentIdentity, AgentStats, AgentStatus};
use std::sync::Arc;
use tokio::sync::RwLock;

/// `true` if moving from `from` to `to` is a legal transition.
fn is_legal_transition(from: AgentStatus, to: AgentStatus) -> bool {
    use AgentStatus::*;
    match (from, to) {
        (Uninitialized, Initializing) => true,
        (Initializing, Idle) => true,
        (Initializing, Failed) => true,
        (Idle, Busy) | (Busy, Idle) => true,
        (Idle, Paused) => true,
        (Paused, Idle) => true,
        (_, Terminating) => !matches!(from, Terminated | Terminating),
        (Terminating, Terminated) => true,
        (_, Failed) => !matches!(from, Terminated | Failed),
        _ => false,
    }
}

/// Owns one agent's status, stats, and capability advertisement. Created
/// and destroyed with the owning [`crate::agent_shell::AgentShell`].
pub struct LifecycleManager {
    identity: AgentIdentity,
    status: RwLock<AgentStatus>,
    stats: RwLock<AgentStats>,
    memory: Arc<dyn crate::memory::MemoryStore>,
    advertised: RwLock<bool>,
}

impl LifecycleManager {
    pub fn new(identity: AgentIdentity, memory: Arc<dyn crate::memory::MemoryStore>) -> Self {
        Self {
            identity,
            status: RwLock::new(AgentStatus::Uninitialized),
            stats: RwLock::new(AgentStats::default()),
            memory,
            advertised: RwLock::new(false),
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub async fn status(&self) -> AgentStatus {
        *self.status.read().await
    }

    pub async fn stats(&self) -> AgentStats {
        self.stats.read().await.clone()
    }

    /// Validates and applies a status transition. On the first transition
    /// into `idle`, writes the agent's capability advertisement to
    /// `{partition: "fleet", key: "agent/<id>"}`.
    pub async fn transition(&self, to: AgentStatus) -> Result<()> {
        let mut status = self.status.write().await;
        if !is_legal_transition(*status, to) {
            return Err(FleetError::Validation(format!(
                "illegal lifecycle transition: {status:?} -> {to:?}"
            )));
        }
        *status = to;
        drop(status);

        if to == AgentStatus::Idle {
            let mut advertised = self.advertised.write().await;
            if !*advertised {
                self.advertise_capabilities().await?;
                *advertised = true;
            }
        }
        Ok(())
    }

    async fn advertise_capabilities(&self) -> Result<()> {
        let value = serde_json::to_value(&self.identity.capabilities)
            .map_err(FleetError::Serialization)?;
        self.memory
            .store(
                "fleet",
                &format!("agent/{}", self.identity.id),
                value,
                None,
                &self.identity.id,
            )
            .await?;
        Ok(())
    }

    /// Runs `init` under the `initializing` status; on failure the agent
    /// moves to `failed` and the cause is surfaced. On success it moves to
    /// `idle`.
    pub async fn initialize<F, Fut>(&self, init: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        self.transition(AgentStatus::Initializing).await?;
        match init().await {
            Ok(()) => self.transition(AgentStatus::Idle).await,
            Err(e) => {
                // `failed` is reachable from any non-terminal state; the
                // transition itself cannot fail here.
                let _ = self.transition(AgentStatus::Failed).await;
                Err(e)
            }
        }
    }

    /// Runs `cleanup` under `terminating`; cleanup errors are logged but
    /// never prevent reaching `terminated`.
    pub async fn shutdown<F, Fut>(&self, cleanup: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        self.transition(AgentStatus::Terminating).await?;
        if let Err(e) = cleanup().await {
            tracing::warn!(agent = %self.identity.id, error = %e, "cleanup error during shutdown");
        }
        self.transition(AgentStatus::Terminated).await
    }

    pub async fn mark_busy(&self, task_id: String) -> Result<()> {
        self.transition(AgentStatus::Busy).await?;
        self.stats.write().await.start_task(task_id);
        Ok(())
    }

    pub async fn mark_idle_after_success(&self, execution_time_secs: f64) -> Result<()> {
        self.stats.write().await.complete_task(execution_time_secs);
        self.transition(AgentStatus::Idle).await
    }

    pub async fn mark_idle_after_failure(&self) -> Result<()> {
        self.stats.write().await.fail_task();
        self.transition(AgentStatus::Idle).await
    }

    /// Updates running stats without touching status. Used by callers that
    /// manage a batch of tasks under one `busy` window rather than one task
    /// per transition (see [`crate::agent_shell::AgentShell::run_once`]).
    pub async fn record_task_outcome(&self, success: bool, duration_secs: f64) {
        let mut stats = self.stats.write().await;
        if success {
            stats.complete_task(duration_secs);
        } else {
            stats.fail_task();
        }
    }

    pub async fn pause(&self) -> Result<()> {
        self.transition(AgentStatus::Paused).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.transition(AgentStatus::Idle).await
    }
}
