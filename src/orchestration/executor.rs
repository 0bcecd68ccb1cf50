//! Single-node execution with retry and capability fallback.
//!
//! For a node of kind `k` the executor walks the registry's ordered list for
//! `k`. Each capability gets `1 + max_retries` attempts with exponential
//! backoff between them; when they are used up it moves to the next
//! capability. Running out of capabilities is recorded in the returned
//! [`TaskResult`], never raised.

use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::{ToolError, ToolRegistry};
use crate::config::RetryConfig;
use crate::core::{NodeError, TaskNode, TaskResult, ToolAttempt};

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            max_backoff,
        }
    }

    /// No retries and no waiting.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn attempts_per_capability(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based): `backoff * 2^(retry-1)`,
    /// capped at `max_backoff`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self::new(
            cfg.max_retries,
            Duration::from_millis(cfg.backoff_ms),
            Duration::from_millis(cfg.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    policy: RetryPolicy,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, policy: RetryPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute `node`, handing it the results of its succeeded dependencies.
    ///
    /// When `cancel` fires, no further attempts are started and the node
    /// fails as interrupted.
    pub async fn execute(
        &self,
        node: &TaskNode,
        inputs: &[TaskResult],
        cancel: &CancellationToken,
    ) -> TaskResult {
        let started = Instant::now();
        let capabilities = self.registry.capabilities(node.kind);
        if capabilities.is_empty() {
            warn!(node = %node.id, kind = %node.kind, "no capability registered");
            return TaskResult::failed(
                node.id.clone(),
                NodeError::NoCapability { kind: node.kind },
                started.elapsed(),
            );
        }

        let args = node_args(node, inputs);
        let mut attempts = Vec::new();
        let mut tried = Vec::new();

        for tool in capabilities {
            let name = tool.name().to_string();
            tried.push(name.clone());

            for attempt in 1..=self.policy.attempts_per_capability() {
                if attempt > 1 {
                    let delay = self.policy.delay_for(attempt - 1);
                    debug!(node = %node.id, tool = %name, attempt, ?delay, "backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return interrupted(node, started, attempts);
                        }
                    }
                }
                if cancel.is_cancelled() {
                    return interrupted(node, started, attempts);
                }

                let outcome = match AssertUnwindSafe(tool.invoke(node.kind, &args))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(out)) if out.result.is_null() => Err(ToolError::NoResult),
                    Ok(other) => other,
                    Err(panic) => Err(ToolError::Failed(format!(
                        "capability panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                };

                match outcome {
                    Ok(out) => {
                        attempts.push(ToolAttempt {
                            tool: name.clone(),
                            attempt,
                            error: None,
                        });
                        info!(node = %node.id, tool = %name, attempt, confidence = out.confidence, "node succeeded");
                        return TaskResult::succeeded(
                            node.id.clone(),
                            out.result,
                            &name,
                            out.confidence,
                            started.elapsed(),
                        )
                        .with_attempts(attempts);
                    }
                    Err(e) => {
                        warn!(node = %node.id, tool = %name, attempt, error = %e, "capability attempt failed");
                        attempts.push(ToolAttempt {
                            tool: name.clone(),
                            attempt,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
            debug!(node = %node.id, tool = %name, "falling over to next capability");
        }

        warn!(node = %node.id, kind = %node.kind, tried = ?tried, "all capabilities exhausted");
        let mut result = TaskResult::failed(
            node.id.clone(),
            NodeError::ToolExhausted {
                kind: node.kind,
                tried: tried.clone(),
            },
            started.elapsed(),
        )
        .with_attempts(attempts);
        result.tool_used = tried.last().cloned();
        result
    }
}

fn interrupted(node: &TaskNode, started: Instant, attempts: Vec<ToolAttempt>) -> TaskResult {
    TaskResult::failed(
        node.id.clone(),
        NodeError::Interrupted {
            reason: "query cancelled".to_string(),
        },
        started.elapsed(),
    )
    .with_attempts(attempts)
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Arguments passed to every capability for `node`.
pub fn node_args(node: &TaskNode, inputs: &[TaskResult]) -> Value {
    let inputs: Vec<Value> = inputs
        .iter()
        .map(|r| {
            json!({
                "node_id": r.node_id,
                "payload": r.payload,
                "tool_used": r.tool_used,
                "confidence": r.confidence,
            })
        })
        .collect();
    json!({
        "node_id": node.id,
        "kind": node.kind,
        "description": node.description,
        "inputs": inputs,
    })
}
