//! Scheduler for dependency-ordered parallel node execution.
//!
//! The scheduler drives one query's [`TaskGraph`] to completion. Ready nodes
//! are admitted to a bounded [`WorkerPool`] in priority order and run
//! concurrently through the [`ToolExecutor`]. A failed node skips all of its
//! transitive dependents, while independent branches keep running.
//!
//! Cancellation, either from the caller's token or the deadline, stops
//! admission immediately. Nodes already running get a grace period to
//! finish; whatever is still running afterwards is failed as interrupted.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{NodeError, NodeId, NodeStatus, TaskGraph, TaskResult};
use crate::error::Result;
use crate::orchestration::executor::ToolExecutor;
use crate::orchestration::pool::WorkerPool;

/// Events emitted by the scheduler for node lifecycle changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A node was admitted to a worker slot.
    NodeStarted { node_id: NodeId },
    NodeSucceeded {
        node_id: NodeId,
        tool: Option<String>,
    },
    NodeFailed { node_id: NodeId, error: String },
    /// A node will never run because a dependency failed or the query was
    /// cancelled.
    NodeSkipped { node_id: NodeId, reason: String },
    /// Admission stopped early.
    Cancelled { reason: String },
    /// Every node is terminal.
    GraphComplete,
}

/// Summary of one scheduler run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleOutcome {
    /// Results in completion order.
    pub results: Vec<TaskResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Set when admission was stopped by cancellation or deadline.
    pub cancelled: Option<String>,
    /// Most nodes running at once.
    pub max_parallelism: usize,
    pub elapsed: Duration,
}

impl ScheduleOutcome {
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.is_some()
    }
}

type NodeRun = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

pub struct TaskScheduler {
    executor: Arc<ToolExecutor>,
    max_concurrent: usize,
    grace: Duration,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl TaskScheduler {
    /// # Arguments
    ///
    /// * `executor` - Runs individual nodes
    /// * `max_concurrent` - Worker ceiling for one graph
    /// * `grace` - How long running nodes may finish after cancellation
    pub fn new(executor: Arc<ToolExecutor>, max_concurrent: usize, grace: Duration) -> Self {
        Self {
            executor,
            max_concurrent,
            grace,
            event_tx: None,
        }
    }

    /// Emit [`SchedulerEvent`]s on `tx`. Send failures are ignored.
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    async fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Run `graph` until every node is terminal.
    ///
    /// # Errors
    ///
    /// Returns `CyclicGraph` before running anything if the graph is not a
    /// DAG. Node failures never surface here; they are recorded in the graph
    /// and the outcome.
    pub async fn run(
        &self,
        graph: &mut TaskGraph,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<ScheduleOutcome> {
        graph.validate()?;

        let started = Instant::now();
        let mut pool = WorkerPool::new(self.max_concurrent);
        let mut running: FuturesUnordered<NodeRun> = FuturesUnordered::new();
        let mut outcome = ScheduleOutcome::default();
        let mut grace_deadline: Option<Instant> = None;
        // Cancelled on deadline too, so nodes stop retrying once admission stops.
        let node_cancel = cancel.child_token();

        info!(nodes = graph.len(), max_concurrent = pool.max_concurrent(), "scheduling graph");

        loop {
            if outcome.cancelled.is_none() {
                let stop = if cancel.is_cancelled() {
                    Some("query cancelled")
                } else if deadline.is_some_and(|d| d <= Instant::now()) {
                    Some("deadline exceeded")
                } else {
                    None
                };
                if let Some(reason) = stop {
                    node_cancel.cancel();
                    grace_deadline = Some(Instant::now() + self.grace);
                    self.stop_admission(graph, reason, &mut outcome).await;
                }
            }
            if outcome.cancelled.is_none() {
                self.dispatch_ready(graph, &mut pool, &mut running, &node_cancel)
                    .await?;
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                Some(result) = running.next() => {
                    pool.release(&result.node_id);
                    self.record(graph, result, &mut outcome).await?;
                }
                _ = cancel.cancelled(), if outcome.cancelled.is_none() => {
                    node_cancel.cancel();
                    grace_deadline = Some(Instant::now() + self.grace);
                    self.stop_admission(graph, "query cancelled", &mut outcome).await;
                }
                _ = sleep_until_opt(deadline), if outcome.cancelled.is_none() => {
                    node_cancel.cancel();
                    grace_deadline = Some(Instant::now() + self.grace);
                    self.stop_admission(graph, "deadline exceeded", &mut outcome).await;
                }
                _ = sleep_until_opt(grace_deadline), if grace_deadline.is_some() => {
                    warn!(running = running.len(), "grace period expired, interrupting running nodes");
                    break;
                }
            }
        }

        // Dropping the futures abandons any node that outlived the grace period.
        drop(running);
        let reason = outcome
            .cancelled
            .clone()
            .unwrap_or_else(|| "scheduler stopped".to_string());
        for node_id in pool.active_nodes() {
            pool.release(&node_id);
            let result = TaskResult::failed(
                node_id.clone(),
                NodeError::Interrupted {
                    reason: reason.clone(),
                },
                graph
                    .get(&node_id)
                    .and_then(|n| n.started_at)
                    .and_then(|t| (chrono::Utc::now() - t).to_std().ok())
                    .unwrap_or_default(),
            );
            self.record(graph, result, &mut outcome).await?;
        }

        // Nothing should be left, but a node whose dependencies can never
        // succeed must not stay pending.
        for node_id in graph.skip_unstarted(&reason) {
            outcome.skipped += 1;
            self.emit(SchedulerEvent::NodeSkipped {
                node_id,
                reason: reason.clone(),
            })
            .await;
        }

        outcome.max_parallelism = pool.high_water();
        outcome.elapsed = started.elapsed();
        debug_assert!(graph.is_done());
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            skipped = outcome.skipped,
            max_parallelism = outcome.max_parallelism,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "graph complete"
        );
        self.emit(SchedulerEvent::GraphComplete).await;
        Ok(outcome)
    }

    /// Admit ready nodes in priority order until the pool is full.
    async fn dispatch_ready(
        &self,
        graph: &mut TaskGraph,
        pool: &mut WorkerPool,
        running: &mut FuturesUnordered<NodeRun>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for node_id in graph.ready_nodes() {
            if !pool.has_capacity() {
                break;
            }
            pool.admit(&node_id)?;

            let node = graph.node_mut(&node_id)?;
            if node.status == NodeStatus::Pending {
                node.mark_ready()?;
            }
            node.start()?;
            let snapshot = node.clone();
            let inputs = graph.dependency_results(&node_id);

            debug!(node = %node_id, kind = %snapshot.kind, priority = snapshot.priority.get(), inputs = inputs.len(), "node started");
            self.emit(SchedulerEvent::NodeStarted {
                node_id: node_id.clone(),
            })
            .await;

            let executor = Arc::clone(&self.executor);
            let cancel = cancel.clone();
            running.push(Box::pin(async move {
                executor.execute(&snapshot, &inputs, &cancel).await
            }));
        }
        Ok(())
    }

    /// Attach a finished node's result and apply skip propagation.
    async fn record(
        &self,
        graph: &mut TaskGraph,
        result: TaskResult,
        outcome: &mut ScheduleOutcome,
    ) -> Result<()> {
        let node_id = result.node_id.clone();
        graph.node_mut(&node_id)?.finish(result.clone())?;

        if result.success {
            outcome.succeeded += 1;
            self.emit(SchedulerEvent::NodeSucceeded {
                node_id,
                tool: result.tool_used.clone(),
            })
            .await;
        } else {
            outcome.failed += 1;
            let error = result
                .error_message()
                .unwrap_or_else(|| "unknown error".to_string());
            warn!(node = %node_id, %error, "node failed");
            self.emit(SchedulerEvent::NodeFailed {
                node_id: node_id.clone(),
                error,
            })
            .await;

            let reason = format!("dependency {} failed", node_id);
            for skipped in graph.propagate_failure(&node_id) {
                debug!(node = %skipped, %reason, "node skipped");
                outcome.skipped += 1;
                self.emit(SchedulerEvent::NodeSkipped {
                    node_id: skipped,
                    reason: reason.clone(),
                })
                .await;
            }
        }
        outcome.results.push(result);
        Ok(())
    }

    async fn stop_admission(&self, graph: &mut TaskGraph, reason: &str, outcome: &mut ScheduleOutcome) {
        warn!(%reason, "stopping admission");
        outcome.cancelled = Some(reason.to_string());
        self.emit(SchedulerEvent::Cancelled {
            reason: reason.to_string(),
        })
        .await;
        for node_id in graph.skip_unstarted(reason) {
            outcome.skipped += 1;
            self.emit(SchedulerEvent::NodeSkipped {
                node_id,
                reason: reason.to_string(),
            })
            .await;
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}
