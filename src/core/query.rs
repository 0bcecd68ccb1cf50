//! Query-level data model: the incoming question, its routing verdict and
//! the final answer handed back to the caller.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A question as received. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub raw_text: String,
    pub submitted_at: DateTime<Utc>,
}

impl Query {
    pub fn new(raw_text: &str) -> Self {
        Self {
            id: QueryId::new(),
            raw_text: raw_text.to_string(),
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

/// How a query should be routed. Produced once per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityVerdict {
    pub complexity: Complexity,
    pub reason: String,
    pub strategy: String,
    /// True when the heuristic decided because the model was unavailable.
    #[serde(default)]
    pub heuristic: bool,
}

impl ComplexityVerdict {
    pub fn new(complexity: Complexity, reason: &str, strategy: &str) -> Self {
        Self {
            complexity,
            reason: reason.to_string(),
            strategy: strategy.to_string(),
            heuristic: false,
        }
    }

    pub fn is_complex(&self) -> bool {
        self.complexity == Complexity::Complex
    }
}

/// Two results that assert different values for the same claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub claim: String,
    /// `(source, value)` pairs in the order they were seen.
    pub values: Vec<(String, String)>,
}

/// Bookkeeping that travels with an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub query_id: Option<QueryId>,
    pub complexity: Option<Complexity>,
    /// Answer produced despite partial or total failure.
    pub degraded: bool,
    pub task_count: usize,
    pub succeeded_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    /// Failed/skipped nodes and pipeline problems, stated for the reader.
    pub caveats: Vec<String>,
    pub contradictions: Vec<Contradiction>,
    /// Whether the query was cut short by timeout or abort.
    pub cancelled: bool,
    pub latency_ms: u64,
}

/// The terminal artifact of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub metadata: AnswerMetadata,
}

impl FinalAnswer {
    /// An answer flagged as degraded with zero confidence.
    pub fn degraded(text: &str, caveat: &str) -> Self {
        Self {
            text: text.to_string(),
            sources: Vec::new(),
            confidence: 0.0,
            metadata: AnswerMetadata {
                degraded: true,
                caveats: vec![caveat.to_string()],
                ..Default::default()
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.metadata.degraded
    }
}
