//! Orchestration layer for the query swarm.
//!
//! This module turns a query into an answer: the classifier routes it, the
//! planner builds a task graph, the scheduler runs the graph through the
//! tool executor under a per-query worker ceiling, and the synthesizer
//! merges the results. The coordinator drives all of it behind a
//! swarm-wide admission ceiling and keeps the process metrics.

pub mod classifier;
pub mod coordinator;
pub mod executor;
pub mod metrics;
pub mod planner;
pub mod pool;
pub mod scheduler;
pub mod synthesizer;

pub use classifier::{complexity_score, heuristic_verdict, ComplexityClassifier};
pub use coordinator::{SwarmBuilder, SwarmCoordinator, SwarmState, SwarmStatus};
pub use executor::{RetryPolicy, ToolExecutor};
pub use metrics::{MetricsAggregator, SwarmMetrics};
pub use planner::{graph_from_plan, TaskPlanner};
pub use pool::WorkerPool;
pub use scheduler::{ScheduleOutcome, SchedulerEvent, TaskScheduler};
pub use synthesizer::{Claim, ResultSynthesizer};
