//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted language model that answers by role
//! - Instrumented tools that record when each node ran
//! - Predefined plans and test configs

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use query_swarm::capability::{
    GenerationError, GenerationRequest, Generator, Role, Tool, ToolError, ToolOutput,
};
use query_swarm::core::TaskKind;
use query_swarm::{Config, SwarmCoordinator};

/// Queries containing this text make the writer fail.
pub const BROKEN_WRITER: &str = "broken";

/// Node descriptions containing this text make a [`ProbeTool`] fail.
pub const FAIL_MARKER: &str = "FAIL";

/// Node descriptions containing this text make a [`ProbeTool`] panic.
pub const PANIC_MARKER: &str = "PANIC";

/// Language model stand-in with a fixed verdict and plan.
pub struct ScriptedModel {
    complex: bool,
    plan: Value,
    panic_on_plan: bool,
    writer_delay: Duration,
    calls: Mutex<HashMap<Role, usize>>,
    writers: Gauge,
}

impl ScriptedModel {
    /// Classifies every query as simple.
    pub fn simple() -> Self {
        Self {
            complex: false,
            plan: Value::Null,
            panic_on_plan: false,
            writer_delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            writers: Gauge::default(),
        }
    }

    /// Classifies every query as complex and answers the planner with `plan`.
    pub fn complex(plan: Value) -> Self {
        Self {
            complex: true,
            plan,
            ..Self::simple()
        }
    }

    pub fn panicking_planner(mut self) -> Self {
        self.panic_on_plan = true;
        self
    }

    pub fn writer_delay(mut self, delay: Duration) -> Self {
        self.writer_delay = delay;
        self
    }

    pub fn calls(&self, role: Role) -> usize {
        self.calls.lock().unwrap().get(&role).copied().unwrap_or(0)
    }

    /// Most writer calls seen in flight at once.
    pub fn peak_writers(&self) -> usize {
        self.writers.peak()
    }
}

#[async_trait]
impl Generator for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        *self.calls.lock().unwrap().entry(request.role).or_insert(0) += 1;

        match request.role {
            Role::Master => Ok(json!({
                "complexity": if self.complex { "complex" } else { "simple" },
                "reason": "scripted",
                "strategy": "scripted"
            })),
            Role::Planner => {
                if self.panic_on_plan {
                    panic!("planner exploded");
                }
                Ok(self.plan.clone())
            }
            Role::Writer => {
                if request.user_prompt.contains(BROKEN_WRITER) {
                    return Err(GenerationError::Unavailable("writer offline".into()));
                }
                let _slot = self.writers.enter();
                tokio::time::sleep(self.writer_delay).await;
                Ok(json!({"answer": "scripted answer", "confidence": 0.9}))
            }
            Role::Executor => Err(GenerationError::Unavailable("no executor".into())),
        }
    }
}

/// Tracks how many callers are inside a section and the most ever seen.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) -> GaugeSlot<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeSlot(self)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct GaugeSlot<'a>(&'a Gauge);

impl Drop for GaugeSlot<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One node run as seen by a [`ProbeTool`].
#[derive(Debug, Clone)]
pub struct Run {
    pub node: String,
    pub tool: String,
    pub inputs: usize,
    pub start: Instant,
    /// `None` when the run was dropped before finishing.
    pub end: Option<Instant>,
}

/// Shared record of every run across a set of tools.
#[derive(Default)]
pub struct ProbeLog {
    runs: Mutex<Vec<Run>>,
    gauge: Gauge,
}

impl ProbeLog {
    pub fn runs(&self) -> Vec<Run> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run(&self, node: &str) -> Option<Run> {
        self.runs().into_iter().find(|r| r.node == node && r.end.is_some())
    }

    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }

    fn start(&self, node: &str, tool: &str, inputs: usize) -> usize {
        let mut runs = self.runs.lock().unwrap();
        runs.push(Run {
            node: node.to_string(),
            tool: tool.to_string(),
            inputs,
            start: Instant::now(),
            end: None,
        });
        runs.len() - 1
    }

    fn finish(&self, index: usize) {
        self.runs.lock().unwrap()[index].end = Some(Instant::now());
    }
}

/// Tool that sleeps, then echoes the node description.
///
/// Fails on [`FAIL_MARKER`] and panics on [`PANIC_MARKER`].
pub struct ProbeTool {
    name: String,
    kinds: Vec<TaskKind>,
    delay: Duration,
    slow_marker: Option<(String, Duration)>,
    fails_always: bool,
    log: Arc<ProbeLog>,
}

impl ProbeTool {
    pub fn new(name: &str, log: &Arc<ProbeLog>) -> Self {
        Self {
            name: name.to_string(),
            kinds: TaskKind::ALL.to_vec(),
            delay: Duration::ZERO,
            slow_marker: None,
            fails_always: false,
            log: Arc::clone(log),
        }
    }

    pub fn kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Nodes whose description contains `marker` take `delay` instead.
    pub fn slow_on(mut self, marker: &str, delay: Duration) -> Self {
        self.slow_marker = Some((marker.to_string(), delay));
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.fails_always = true;
        self
    }

    pub fn arc(self) -> Arc<dyn Tool> {
        Arc::new(self)
    }
}

#[async_trait]
impl Tool for ProbeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, kind: TaskKind) -> bool {
        self.kinds.contains(&kind)
    }

    async fn invoke(&self, _kind: TaskKind, args: &Value) -> Result<ToolOutput, ToolError> {
        let node = args["node_id"].as_str().unwrap_or_default().to_string();
        let description = args["description"].as_str().unwrap_or_default().to_string();
        let inputs = args["inputs"].as_array().map(Vec::len).unwrap_or(0);

        let _slot = self.log.gauge.enter();
        let index = self.log.start(&node, &self.name, inputs);

        let delay = match &self.slow_marker {
            Some((marker, slow)) if description.contains(marker.as_str()) => *slow,
            _ => self.delay,
        };
        tokio::time::sleep(delay).await;
        self.log.finish(index);

        if description.contains(PANIC_MARKER) {
            panic!("probe {} hit a panic marker", self.name);
        }
        if self.fails_always || description.contains(FAIL_MARKER) {
            return Err(ToolError::Unavailable(format!("{} is down", self.name)));
        }
        Ok(ToolOutput::new(
            json!(format!("{} ({})", description, self.name)),
            0.9,
        ))
    }
}

/// Config with fast retries and no LLM fallback tool.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.max_retries = 0;
    config.retry.backoff_ms = 1;
    config.retry.max_backoff_ms = 1;
    config.tools.llm_fallback = false;
    config.cancel_grace_ms = 50;
    config
}

pub fn swarm(config: Config, model: &Arc<ScriptedModel>, tools: Vec<Arc<dyn Tool>>) -> SwarmCoordinator {
    query_swarm::log::init();
    let mut builder = SwarmCoordinator::builder(config).generator(model.clone());
    for tool in tools {
        builder = builder.tool(tool);
    }
    builder.build().expect("test swarm should build")
}

/// Two independent searches feeding one compare node.
pub fn comparison_plan() -> Value {
    json!({
        "tasks": [
            {"id": "s1", "type": "search", "description": "汉武大帝的出生年份"},
            {"id": "s2", "type": "search", "description": "凯撒大帝的出生年份"},
            {"id": "c1", "type": "compare", "description": "比较两人的年龄"}
        ],
        "dependencies": {}
    })
}

/// `n` independent search nodes.
pub fn independent_plan(n: usize) -> Value {
    let tasks: Vec<Value> = (0..n)
        .map(|i| json!({"id": format!("t{}", i), "type": "search", "description": format!("lookup {}", i)}))
        .collect();
    json!({"tasks": tasks, "dependencies": {}})
}
