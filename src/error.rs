use thiserror::Error;

use crate::capability::{GenerationError, ToolError};
use crate::core::{NodeId, TaskKind};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Dependency cycle detected: {0}")]
    CyclicGraph(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Invalid status transition for {node} from {from} to {to}")]
    InvalidTransition {
        node: NodeId,
        from: String,
        to: String,
    },

    #[error("Result already attached to node {0}")]
    ResultAlreadyAttached(NodeId),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("All capabilities for {kind} exhausted (tried: {})", tried.join(", "))]
    ToolExhausted { kind: TaskKind, tried: Vec<String> },

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Scheduler timed out after {0:?}")]
    SchedulerTimeout(std::time::Duration),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Response violated schema: {0}")]
    SchemaViolation(String),

    #[error("Worker pool is full (max: {max})")]
    PoolFull { max: usize },

    #[error("Swarm is shutting down")]
    ShuttingDown,

    #[error("Query cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
