//! Core data model shared by every component in the fleet core.
//!
//! These types are intentionally dumb records: construction helpers live
//! here, behavior (state transitions, confidence updates, batch formation)
//! lives in the owning component.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A stable agent identifier. Opaque from the fleet core's perspective;
/// concrete agents are free to encode structure into it.
pub type AgentId = String;

/// A named, versioned feature a concrete agent advertises.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capability {
    pub name: String,
    pub version: String,
    pub parameters: HashMap<String, String>,
}

impl Capability {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// An agent kind. Left as a string rather than a closed enum: external QE
/// adapters register new kinds without a core crate release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AgentKind(pub String);

impl From<&str> for AgentKind {
    fn from(s: &str) -> Self {
        AgentKind(s.to_string())
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Agent identity: a stable id, a kind, and declared capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: AgentId,
    pub kind: AgentKind,
    pub capabilities: Vec<Capability>,
}

/// Legal lifecycle states for an agent. Transitions are enforced by
/// [`crate::lifecycle::LifecycleManager`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentStatus {
    Uninitialized,
    Initializing,
    Idle,
    Busy,
    Paused,
    Terminating,
    Terminated,
    Failed,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Per-agent running statistics: tasks completed/failed and a
/// running-average execution time, kept independent of agent kind.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentStats {
    pub is_busy: bool,
    pub current_task_id: Option<String>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub average_execution_time_secs: f64,
}

impl AgentStats {
    pub fn start_task(&mut self, task_id: String) {
        self.is_busy = true;
        self.current_task_id = Some(task_id);
    }

    pub fn complete_task(&mut self, execution_time_secs: f64) {
        self.is_busy = false;
        self.current_task_id = None;
        self.tasks_completed += 1;
        self.average_execution_time_secs = (self.average_execution_time_secs
            * (self.tasks_completed - 1) as f64
            + execution_time_secs)
            / self.tasks_completed as f64;
    }

    pub fn fail_task(&mut self) {
        self.is_busy = false;
        self.current_task_id = None;
        self.tasks_failed += 1;
    }
}

/// A task type tag, drawn from an agent-specific vocabulary. Left open
/// rather than a closed enum so adapters can register new task types.
pub type TaskType = String;

/// Execution hints. Hints never affect correctness; the dispatcher and
/// handlers may use them as advisory input only.
pub type TaskHints = HashMap<String, String>;

/// A unit of work submitted to the fleet. Immutable once submitted: the
/// dispatcher tracks mutable status separately (see [`TaskRecord`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    pub depends_on: Vec<String>,
    pub hints: TaskHints,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
            priority: 0,
            deadline: None,
            depends_on: Vec::new(),
            hints: HashMap::new(),
            submitted_at: chrono::Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: chrono::DateTime<chrono::Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn depends_on(mut self, task_ids: impl IntoIterator<Item = String>) -> Self {
        self.depends_on = task_ids.into_iter().collect();
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }
}

/// Dispatcher-tracked lifecycle state of a submitted task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// A task plus its dispatcher-owned mutable state. Kept separate from
/// [`Task`] so the submitted record stays immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    pub state: TaskState,
    pub retries_consumed: u32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TaskRecord {
    pub fn new(task: Task) -> Self {
        let now = chrono::Utc::now();
        Self {
            task,
            state: TaskState::Pending,
            retries_consumed: 0,
            updated_at: now,
        }
    }
}

/// A discriminated task outcome. Every result carries its duration and the
/// count of retries consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub duration_secs: f64,
    pub retries_consumed: u32,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { payload: serde_json::Value },
    Failure {
        kind: crate::error::ErrorKind,
        message: String,
    },
    Cancelled,
}

/// Event severities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// An immutable notification published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub severity: Severity,
    pub source: AgentId,
    /// Assigned at publication; monotonic within the bus's lifetime.
    pub sequence: u64,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// Target of a directed agent message: a specific agent, or broadcast to
/// a swarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MessageTarget {
    Agent(AgentId),
    Broadcast { swarm_id: String },
}

/// A directed envelope between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub source: AgentId,
    pub target: MessageTarget,
    pub channel: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A key/value entry in the shared memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub partition: String,
    pub ttl_secs: Option<u64>,
    pub value: serde_json::Value,
    pub writer: AgentId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub version: u64,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A reusable learned association between a task signature and a
/// recommended strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub pattern_type: String,
    pub domain: String,
    pub content: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub confidence: f64,
    pub usage_count: u64,
    pub success_rate: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Pattern {
    pub fn new(pattern_type: impl Into<String>, domain: impl Into<String>, content: serde_json::Value) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            pattern_type: pattern_type.into(),
            domain: domain.into(),
            content,
            embedding: None,
            confidence: 0.5,
            usage_count: 0,
            success_rate: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Feeds the learning loop: one record per task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub task_id: String,
    pub task_type: TaskType,
    pub strategy: Option<String>,
    pub success: bool,
    pub duration_secs: f64,
    pub error_kind: Option<crate::error::ErrorKind>,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Per-strategy accumulators for an A/B test.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StrategyAccumulator {
    pub success_rate: f64,
    pub avg_time_secs: f64,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyUnderTest {
    pub name: String,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbTestStatus {
    Running,
    Completed,
    Cancelled,
}

/// An A/B test owned by the learning loop until completion, then frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub id: String,
    pub name: String,
    pub strategies: Vec<StrategyUnderTest>,
    pub target_sample_size: u64,
    pub accumulators: HashMap<String, StrategyAccumulator>,
    pub status: AbTestStatus,
    pub winner: Option<String>,
}

impl AbTest {
    pub fn new(name: impl Into<String>, strategies: Vec<StrategyUnderTest>, target_sample_size: u64) -> Self {
        let accumulators = strategies
            .iter()
            .map(|s| (s.name.clone(), StrategyAccumulator::default()))
            .collect();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            strategies,
            target_sample_size,
            accumulators,
            status: AbTestStatus::Running,
            winner: None,
        }
    }

    /// `true` once every strategy accumulator has reached the target
    /// sample size (the test's sample budget is "full").
    pub fn sample_budget_full(&self) -> bool {
        self.accumulators
            .values()
            .all(|acc| acc.sample_count >= self.target_sample_size)
    }
}
