//! Core domain models for query orchestration.
//!
//! This module contains the fundamental data structures used throughout
//! the engine: queries and answers, task nodes and the execution graph.

pub mod dag;
pub mod query;
pub mod task;

pub use dag::{DependencyType, TaskGraph};
pub use query::{
    AnswerMetadata, Complexity, ComplexityVerdict, Contradiction, FinalAnswer, Query, QueryId,
};
pub use task::{NodeError, NodeId, NodeStatus, Priority, TaskKind, TaskNode, TaskResult, ToolAttempt};
