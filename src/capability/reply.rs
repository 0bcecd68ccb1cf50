//! Typed replies for each model role.
//!
//! The response schema sent with a request is generated from these types,
//! and deserializing into them is the schema check.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::{Complexity, TaskKind};

/// Routing verdict from the master role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationReply {
    pub complexity: Complexity,
    /// Why the query was classified this way
    pub reason: String,
    /// Recommended way to answer
    #[serde(default)]
    pub strategy: String,
}

/// A plan as the planner role returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanReply {
    pub tasks: Vec<PlannedTask>,
    /// `task id -> ids it depends on`.
    #[serde(default)]
    pub dependencies: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlannedTask {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// One atomic sub-question
    pub description: String,
    /// 1 (lowest) to 5 (highest)
    #[serde(default)]
    pub priority: Option<i64>,
}

/// One node executed through the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutorReply {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Option<ExecutorMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutorMetadata {
    /// Between 0 and 1
    pub confidence: Option<f64>,
}

/// Final answer text from the writer role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WriterReply {
    pub answer: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// JSON Schema for `T`, as sent with a request.
pub fn response_schema<T: JsonSchema>() -> Value {
    schemars::schema_for!(T).to_value()
}
