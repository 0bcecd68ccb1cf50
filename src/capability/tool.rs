//! External tool contract and the per-kind capability registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::capability::llm::StructuredGenerator;
use crate::capability::prompts::Role;
use crate::capability::reply::ExecutorReply;
use crate::core::TaskKind;

/// Confidence assumed when a capability does not report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// What a capability hands back for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub result: Value,
    pub confidence: f64,
}

impl ToolOutput {
    pub fn new(result: Value, confidence: f64) -> Self {
        Self {
            result,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("capability returned no usable result")]
    NoResult,

    #[error("{0}")]
    Failed(String),
}

/// A capability that can execute nodes of one or more kinds.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: TaskKind) -> bool;

    /// `args` carries the node description, kind and dependency inputs.
    async fn invoke(&self, kind: TaskKind, args: &Value) -> Result<ToolOutput, ToolError>;
}

/// Ordered capability lists per task kind. The first entry is primary and
/// the rest are tried in order as fallbacks.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    by_kind: HashMap<TaskKind, Vec<Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `tool` to the list for `kind`.
    pub fn register(&mut self, kind: TaskKind, tool: Arc<dyn Tool>) {
        self.by_kind.entry(kind).or_default().push(tool);
    }

    /// Append `tool` to the list of every kind it supports.
    pub fn register_all(&mut self, tool: Arc<dyn Tool>) {
        for kind in TaskKind::ALL {
            if tool.supports(kind) {
                self.register(kind, Arc::clone(&tool));
            }
        }
    }

    /// Build a registry whose per-kind order follows `order`: tools named
    /// there come first in the listed order, remaining supporting tools keep
    /// their relative order after them.
    pub fn from_tools(tools: &[Arc<dyn Tool>], order: &HashMap<TaskKind, Vec<String>>) -> Self {
        let mut registry = Self::new();
        for kind in TaskKind::ALL {
            let supporting: Vec<&Arc<dyn Tool>> =
                tools.iter().filter(|t| t.supports(kind)).collect();

            if let Some(names) = order.get(&kind) {
                for name in names {
                    match supporting.iter().find(|t| t.name() == name) {
                        Some(t) => registry.register(kind, Arc::clone(*t)),
                        None => warn!(%kind, tool = %name, "configured tool not registered for kind"),
                    }
                }
            }
            for t in supporting {
                if !registry.names(kind).iter().any(|n| n == t.name()) {
                    registry.register(kind, Arc::clone(t));
                }
            }
        }
        registry
    }

    pub fn capabilities(&self, kind: TaskKind) -> &[Arc<dyn Tool>] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self, kind: TaskKind) -> Vec<String> {
        self.capabilities(kind)
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(Vec::is_empty)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for kind in TaskKind::ALL {
            map.entry(&kind, &self.names(kind));
        }
        map.finish()
    }
}

/// Executes any node kind through the language model's executor role.
#[derive(Clone)]
pub struct LlmTool {
    generator: StructuredGenerator,
}

impl LlmTool {
    pub const NAME: &'static str = "llm";

    pub fn new(generator: StructuredGenerator) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Tool for LlmTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, _kind: TaskKind) -> bool {
        true
    }

    async fn invoke(&self, kind: TaskKind, args: &Value) -> Result<ToolOutput, ToolError> {
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let inputs = args.get("inputs").cloned().unwrap_or_else(|| json!([]));
        let inputs = inputs.to_string();

        let reply: ExecutorReply = self
            .generator
            .generate(
                Role::Executor,
                &[
                    ("task_description", description),
                    ("task_type", kind.as_str()),
                    ("inputs", inputs.as_str()),
                ],
            )
            .await
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;

        if !reply.success {
            let reason = reply.error.unwrap_or_else(|| "model reported failure".to_string());
            return Err(ToolError::Failed(reason));
        }

        let result = reply.result;
        if result.is_null() || result.as_str().is_some_and(|s| s.trim().is_empty()) {
            return Err(ToolError::NoResult);
        }

        let confidence = reply
            .metadata
            .and_then(|m| m.confidence)
            .unwrap_or(DEFAULT_CONFIDENCE);
        debug!(%kind, confidence, "llm tool produced result");
        Ok(ToolOutput::new(result, confidence))
    }
}
