//! Swarm coordinator: the single entry point for queries.
//!
//! The coordinator admits queries through a FIFO semaphore (the swarm-wide
//! ceiling), routes each one through classification, planning, scheduling
//! and synthesis, and always hands back a [`FinalAnswer`]. Errors and
//! panics from any stage become degraded answers and count as failures in
//! the swarm metrics.

use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::capability::{
    Generator, LlmTool, PromptProvider, StaticPrompts, StructuredGenerator, Tool, ToolRegistry,
};
use crate::config::Config;
use crate::core::{Complexity, FinalAnswer, NodeStatus, Query, TaskGraph};
use crate::error::{Error, Result};
use crate::orchestration::classifier::ComplexityClassifier;
use crate::orchestration::executor::{panic_message, RetryPolicy, ToolExecutor};
use crate::orchestration::metrics::{MetricsAggregator, QuerySlot, SwarmMetrics};
use crate::orchestration::planner::TaskPlanner;
use crate::orchestration::scheduler::{SchedulerEvent, TaskScheduler};
use crate::orchestration::synthesizer::ResultSynthesizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmState {
    Idle,
    Busy,
    ShuttingDown,
}

impl std::fmt::Display for SwarmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwarmState::Idle => write!(f, "idle"),
            SwarmState::Busy => write!(f, "busy"),
            SwarmState::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Read-only status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwarmStatus {
    pub state: SwarmState,
    pub total_queries: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub active_tasks: usize,
    pub queued: usize,
    pub avg_latency_secs: f64,
    pub uptime_secs: f64,
    pub success_rate: f64,
}

/// Assembles a [`SwarmCoordinator`] from config and injected capabilities.
pub struct SwarmBuilder {
    config: Config,
    generator: Option<Arc<dyn Generator>>,
    prompts: Option<Arc<dyn PromptProvider>>,
    tools: Vec<Arc<dyn Tool>>,
    events: Option<mpsc::Sender<SchedulerEvent>>,
}

impl SwarmBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            generator: None,
            prompts: None,
            tools: Vec::new(),
            events: None,
        }
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Override the prompt source. Defaults to the built-in templates with
    /// the config's overrides applied.
    pub fn prompts(mut self, prompts: Arc<dyn PromptProvider>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Register a tool for every kind it supports. Registration order is
    /// fallback order unless `tools.fallback` says otherwise.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn build(self) -> Result<SwarmCoordinator> {
        self.config.validate()?;

        let prompts: Arc<dyn PromptProvider> = match self.prompts {
            Some(p) => p,
            None => Arc::new(StaticPrompts::with_overrides(
                &self.config.prompt_overrides()?,
            )),
        };
        let structured = self
            .generator
            .map(|g| StructuredGenerator::new(g, Arc::clone(&prompts)));

        let mut tools = self.tools;
        if let (Some(gen), true) = (&structured, self.config.tools.llm_fallback) {
            tools.push(Arc::new(LlmTool::new(gen.clone())));
        }
        let registry = ToolRegistry::from_tools(&tools, &self.config.fallback_order()?);
        debug!(registry = ?registry, "tool registry built");

        let classifier = match &structured {
            Some(g) => ComplexityClassifier::new(g.clone()),
            None => ComplexityClassifier::heuristic_only(),
        };
        let planner = structured.clone().map(TaskPlanner::new);
        let synthesizer = ResultSynthesizer::new(structured, self.config.degraded_threshold);
        let executor = ToolExecutor::new(
            Arc::new(registry),
            RetryPolicy::from(&self.config.retry),
        );

        info!(
            max_concurrent_queries = self.config.max_concurrent_queries,
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            "swarm ready"
        );

        Ok(SwarmCoordinator {
            inner: Arc::new(Inner {
                admission: Semaphore::new(self.config.max_concurrent_queries),
                classifier,
                planner,
                executor: Arc::new(executor),
                synthesizer,
                metrics: MetricsAggregator::new(),
                shutdown: CancellationToken::new(),
                events: self.events,
                config: self.config,
            }),
        })
    }
}

struct Inner {
    config: Config,
    classifier: ComplexityClassifier,
    planner: Option<TaskPlanner>,
    executor: Arc<ToolExecutor>,
    synthesizer: ResultSynthesizer,
    admission: Semaphore,
    metrics: MetricsAggregator,
    shutdown: CancellationToken,
    events: Option<mpsc::Sender<SchedulerEvent>>,
}

/// Cheap to clone; clones share admission, metrics and shutdown state.
#[derive(Clone)]
pub struct SwarmCoordinator {
    inner: Arc<Inner>,
}

impl SwarmCoordinator {
    pub fn builder(config: Config) -> SwarmBuilder {
        SwarmBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Answer `text`. Never fails; problems come back as a degraded answer.
    pub async fn submit(&self, text: &str) -> FinalAnswer {
        self.submit_with_cancel(text, CancellationToken::new()).await
    }

    /// Like [`submit`](Self::submit), but `cancel` aborts the query. An
    /// aborted query still returns whatever partial results exist.
    pub async fn submit_with_cancel(&self, text: &str, cancel: CancellationToken) -> FinalAnswer {
        let query = Query::new(text);
        let span = info_span!("query", id = %query.id.short());
        self.handle(query, cancel).instrument(span).await
    }

    async fn handle(&self, query: Query, cancel: CancellationToken) -> FinalAnswer {
        let inner = &self.inner;
        let mut slot = inner.metrics.begin();
        info!(text = %query.raw_text, "query submitted");

        if inner.shutdown.is_cancelled() {
            return reject(&query, slot, &Error::ShuttingDown.to_string());
        }

        let permit = tokio::select! {
            permit = inner.admission.acquire() => permit,
            _ = inner.shutdown.cancelled() => {
                return reject(&query, slot, &Error::ShuttingDown.to_string());
            }
            _ = cancel.cancelled() => {
                return reject(&query, slot, "query cancelled before admission");
            }
        };
        let Ok(_permit) = permit else {
            return reject(&query, slot, &Error::ShuttingDown.to_string());
        };
        slot.admit();
        debug!(waited_ms = slot.elapsed().as_millis() as u64, "query admitted");

        // Cancelled by the caller, by shutdown, or when this query is done.
        let query_cancel = inner.shutdown.child_token();
        let _done = query_cancel.clone().drop_guard();
        {
            let query_cancel = query_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => query_cancel.cancel(),
                    _ = query_cancel.cancelled() => {}
                }
            });
        }

        let outcome = AssertUnwindSafe(self.run_pipeline(&query, &query_cancel))
            .catch_unwind()
            .await;

        let mut answer = match outcome {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(error = %e, "query failed");
                failure_answer(&query, &e.to_string())
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(panic = %msg, "pipeline panicked");
                failure_answer(&query, &format!("internal error: {}", msg))
            }
        };

        let success = !answer.is_degraded();
        let latency = slot.finish(success);
        answer.metadata.query_id = Some(query.id);
        answer.metadata.latency_ms = latency.as_millis() as u64;
        info!(
            success,
            confidence = answer.confidence,
            latency_ms = answer.metadata.latency_ms,
            "query finished"
        );
        answer
    }

    async fn run_pipeline(&self, query: &Query, cancel: &CancellationToken) -> Result<FinalAnswer> {
        let inner = &self.inner;
        let timeout = inner.config.query_timeout();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let text = query.raw_text.as_str();

        let verdict = guarded(inner.classifier.classify(text), cancel, deadline, timeout).await?;
        info!(complexity = %verdict.complexity, heuristic = verdict.heuristic, strategy = %verdict.strategy, "routing query");

        if verdict.complexity == Complexity::Simple {
            let mut answer =
                guarded(inner.synthesizer.answer_directly(text), cancel, deadline, timeout).await?;
            answer.metadata.complexity = Some(Complexity::Simple);
            return Ok(answer);
        }

        let planner = inner
            .planner
            .as_ref()
            .ok_or_else(|| Error::Planning("no planner capability configured".into()))?;
        let mut graph = guarded(planner.plan(text), cancel, deadline, timeout).await?;

        let mut scheduler = TaskScheduler::new(
            Arc::clone(&inner.executor),
            inner.config.max_concurrent_tasks,
            inner.config.cancel_grace(),
        );
        if let Some(tx) = &inner.events {
            scheduler = scheduler.with_events(tx.clone());
        }
        let outcome = scheduler.run(&mut graph, cancel, deadline).await?;

        let mut caveats = graph_caveats(&graph);
        if let Some(reason) = &outcome.cancelled {
            caveats.insert(0, format!("execution stopped early: {}", reason));
        }

        // Synthesis always runs, even after cancellation, on whatever exists.
        let mut answer = inner
            .synthesizer
            .synthesize(text, &graph.succeeded_results(), &caveats)
            .await?;
        answer.metadata.complexity = Some(Complexity::Complex);
        answer.metadata.task_count = graph.len();
        answer.metadata.succeeded_tasks = outcome.succeeded;
        answer.metadata.failed_tasks = outcome.failed;
        answer.metadata.skipped_tasks = outcome.skipped;
        answer.metadata.cancelled = outcome.was_cancelled();
        Ok(answer)
    }

    pub fn metrics(&self) -> SwarmMetrics {
        self.inner.metrics.snapshot()
    }

    pub fn state(&self) -> SwarmState {
        if self.inner.shutdown.is_cancelled() {
            return SwarmState::ShuttingDown;
        }
        let m = self.inner.metrics.snapshot();
        if m.active_tasks > 0 || m.queued > 0 {
            SwarmState::Busy
        } else {
            SwarmState::Idle
        }
    }

    pub fn status(&self) -> SwarmStatus {
        let m = self.inner.metrics.snapshot();
        SwarmStatus {
            state: self.state(),
            total_queries: m.total_queries,
            succeeded: m.succeeded,
            failed: m.failed,
            active_tasks: m.active_tasks,
            queued: m.queued,
            avg_latency_secs: m.avg_latency().as_secs_f64(),
            uptime_secs: m.uptime.as_secs_f64(),
            success_rate: m.success_rate(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop accepting queries, cancel in-flight ones and wait for them to
    /// return their partial answers.
    pub async fn shutdown(&self) {
        info!("swarm shutting down");
        self.inner.shutdown.cancel();
        let slots = u32::try_from(self.inner.config.max_concurrent_queries).unwrap_or(u32::MAX);
        if let Ok(permits) = self.inner.admission.acquire_many(slots).await {
            permits.forget();
        }
        self.inner.admission.close();
        info!(status = ?self.status(), "swarm stopped");
    }
}

/// Run a pre-scheduling stage under the query's cancellation and deadline.
async fn guarded<T>(
    stage: impl Future<Output = Result<T>>,
    cancel: &CancellationToken,
    deadline: Option<tokio::time::Instant>,
    timeout: Option<Duration>,
) -> Result<T> {
    let expired = async {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        result = stage => result,
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = expired => Err(Error::SchedulerTimeout(timeout.unwrap_or_default())),
    }
}

fn graph_caveats(graph: &TaskGraph) -> Vec<String> {
    graph
        .nodes()
        .filter_map(|n| match &n.status {
            NodeStatus::Failed { error } => Some(format!(
                "{} task {} ({}) failed: {}",
                n.kind, n.id, n.description, error
            )),
            NodeStatus::Skipped { reason } => Some(format!(
                "{} task {} ({}) skipped: {}",
                n.kind, n.id, n.description, reason
            )),
            _ => None,
        })
        .collect()
}

fn reject(query: &Query, slot: QuerySlot<'_>, reason: &str) -> FinalAnswer {
    warn!(%reason, "query rejected");
    let mut answer = failure_answer(query, reason);
    let latency = slot.finish(false);
    answer.metadata.query_id = Some(query.id);
    answer.metadata.latency_ms = latency.as_millis() as u64;
    answer
}

fn failure_answer(query: &Query, reason: &str) -> FinalAnswer {
    FinalAnswer::degraded(
        &format!("The query could not be answered: {}", query.raw_text.trim()),
        reason,
    )
}
