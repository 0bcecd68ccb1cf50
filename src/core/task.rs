//! Task node data model for the execution graph.
//!
//! Nodes are the atomic sub-questions a planner produces. Each node tracks
//! its kind, priority, lifecycle status and, once finished, its result.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};

/// Identifier of a node, unique within one graph.
///
/// Planners name their nodes ("task1", "search_caesar"), so ids are
/// strings rather than generated UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a node does; decides which capabilities may execute it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Search,
    Calculate,
    Compare,
    Generate,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Search,
        TaskKind::Calculate,
        TaskKind::Compare,
        TaskKind::Generate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Search => "search",
            TaskKind::Calculate => "calculate",
            TaskKind::Compare => "compare",
            TaskKind::Generate => "generate",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "search" => Ok(TaskKind::Search),
            "calculate" | "calculation" => Ok(TaskKind::Calculate),
            "compare" | "comparison" => Ok(TaskKind::Compare),
            "generate" => Ok(TaskKind::Generate),
            other => Err(Error::Planning(format!("unknown task kind '{}'", other))),
        }
    }
}

/// Scheduling priority, 1 (lowest) to 5 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(1);
    pub const MAX: Priority = Priority(5);

    /// Clamp any integer into the 1..=5 range.
    pub fn new(value: i64) -> Self {
        Self(value.clamp(1, 5) as u8)
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(3)
    }
}

/// Node status in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum NodeStatus {
    /// Waiting on dependencies.
    Pending,
    /// All dependencies succeeded; waiting for a worker slot.
    Ready,
    /// Admitted to the worker pool.
    Running,
    /// Finished with a usable result.
    Succeeded,
    /// Finished without a usable result.
    Failed {
        error: String,
    },
    /// Never run: a dependency failed or the query was cancelled first.
    Skipped {
        reason: String,
    },
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl NodeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Ready => "ready",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed { .. } => "failed",
            NodeStatus::Skipped { .. } => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed { .. } | NodeStatus::Skipped { .. }
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Failed { error } => write!(f, "failed: {}", error),
            NodeStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// Why a node produced no usable result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum NodeError {
    /// Every registered capability failed after retries.
    ToolExhausted { kind: TaskKind, tried: Vec<String> },
    /// Nothing is registered for the node's kind.
    NoCapability { kind: TaskKind },
    /// The query was cancelled while the node was running.
    Interrupted { reason: String },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::ToolExhausted { kind, tried } => write!(
                f,
                "all capabilities for {} exhausted (tried: {})",
                kind,
                tried.join(", ")
            ),
            NodeError::NoCapability { kind } => write!(f, "no capability registered for {}", kind),
            NodeError::Interrupted { reason } => write!(f, "interrupted: {}", reason),
        }
    }
}

/// One capability invocation made while executing a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAttempt {
    pub tool: String,
    /// 1-based attempt number against this tool.
    pub attempt: u32,
    pub error: Option<String>,
}

/// Outcome of executing one node. Immutable once attached to its node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub node_id: NodeId,
    pub success: bool,
    pub payload: Value,
    /// Name of the capability that produced the payload (or last tried).
    pub tool_used: Option<String>,
    pub execution_time: Duration,
    /// Attributed by the capability, in `[0, 1]`.
    pub confidence: f64,
    pub error: Option<NodeError>,
    pub attempts: Vec<ToolAttempt>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn succeeded(
        node_id: NodeId,
        payload: Value,
        tool: &str,
        confidence: f64,
        execution_time: Duration,
    ) -> Self {
        Self {
            node_id,
            success: true,
            payload,
            tool_used: Some(tool.to_string()),
            execution_time,
            confidence: confidence.clamp(0.0, 1.0),
            error: None,
            attempts: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn failed(node_id: NodeId, error: NodeError, execution_time: Duration) -> Self {
        Self {
            node_id,
            success: false,
            payload: Value::Null,
            tool_used: None,
            execution_time,
            confidence: 0.0,
            error: Some(error),
            attempts: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<ToolAttempt>) -> Self {
        self.attempts = attempts;
        self
    }

    /// Human-readable error, if any.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// A single sub-question in the execution graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    pub kind: TaskKind,
    pub description: String,
    pub priority: Priority,
    pub status: NodeStatus,
    pub result: Option<TaskResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskNode {
    /// Create a pending node with default priority.
    pub fn new(id: impl Into<NodeId>, kind: TaskKind, description: &str) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.to_string(),
            priority: Priority::default(),
            status: NodeStatus::Pending,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Pending -> Ready.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.transition(&[NodeStatus::Pending], NodeStatus::Ready)
    }

    /// Ready -> Running.
    pub fn start(&mut self) -> Result<()> {
        self.transition(&[NodeStatus::Ready], NodeStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Succeeded / Failed, attaching the result.
    pub fn finish(&mut self, result: TaskResult) -> Result<()> {
        if self.result.is_some() {
            return Err(Error::ResultAlreadyAttached(self.id.clone()));
        }
        let next = if result.success {
            NodeStatus::Succeeded
        } else {
            NodeStatus::Failed {
                error: result
                    .error_message()
                    .unwrap_or_else(|| "unknown error".to_string()),
            }
        };
        self.transition(&[NodeStatus::Running], next)?;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Pending/Ready -> Skipped. Terminal nodes are left untouched so that
    /// repeated propagation yields the same status.
    pub fn skip(&mut self, reason: &str) -> bool {
        if !matches!(self.status, NodeStatus::Pending | NodeStatus::Ready) {
            return false;
        }
        self.status = NodeStatus::Skipped {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == NodeStatus::Succeeded
    }

    fn transition(&mut self, allowed_from: &[NodeStatus], to: NodeStatus) -> Result<()> {
        if !allowed_from.contains(&self.status) {
            return Err(Error::InvalidTransition {
                node: self.id.clone(),
                from: self.status.label().to_string(),
                to: to.label().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
