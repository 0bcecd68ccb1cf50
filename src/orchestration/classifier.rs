//! Complexity classification for incoming queries.
//!
//! The master role of the language model decides whether a query is simple
//! or complex. When the model is missing or fails, a deterministic heuristic
//! decides instead, so classification never fails a query.
//!
//! ## Heuristic
//!
//! - **Simple patterns** win first (single-fact lookups).
//! - **Complex patterns** come next: comparisons, "who is more", planning
//!   phrasing.
//! - Otherwise a score adds one each for length over 50 characters, every
//!   analysis keyword, every question mark and every connective. A score of
//!   2 or less is simple.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::capability::{ClassificationReply, Role, StructuredGenerator};
use crate::core::{Complexity, ComplexityVerdict};
use crate::error::{Error, Result};

static SIMPLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"汉武大帝的名字",
        r"汉武帝是谁",
        r"凯撒大帝的出生日期",
        r"北京有什么景点",
        r"上海的美食",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static COMPLEX_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"比较.*?和",
        r"谁更",
        r"哪个.*?更好",
        r"分析.*?的",
        r"制定.*?计划",
        r"规划.*?行程",
        r"(?i)\bcompare\b",
        r"(?i)\bvs\.?(\s|$)",
        r"(?i)\bversus\b",
        r"(?i)\bwhich\b.*\bbetter\b",
        r"(?i)\bwho (is|was) (older|younger|taller|richer|more)\b",
        r"(?i)\bplan (a|an|my)\b.*\b(trip|itinerary)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const ANALYSIS_KEYWORDS: &[&str] = &[
    "比较", "对比", "分析", "计算", "规划", "制定", "推荐", "选择", "analyze", "calculate",
    "recommend",
];

const CONNECTIVES: &[&str] = &["和", "与", "或者", "还是", "以及", "同时", " and ", " or "];

/// Score at or below which the heuristic calls a query simple.
pub const SIMPLE_SCORE_LIMIT: usize = 2;

/// Heuristic complexity score of `query`.
pub fn complexity_score(query: &str) -> usize {
    let lower = query.to_lowercase();
    let mut score = 0;
    if query.chars().count() > 50 {
        score += 1;
    }
    score += ANALYSIS_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
    score += query.matches(['?', '？']).count();
    score += CONNECTIVES.iter().filter(|c| lower.contains(*c)).count();
    score
}

/// Classify `query` without the language model.
pub fn heuristic_verdict(query: &str) -> ComplexityVerdict {
    let (complexity, reason) = if SIMPLE_PATTERNS.iter().any(|re| re.is_match(query)) {
        (Complexity::Simple, "matches a single-fact lookup pattern".to_string())
    } else if let Some(re) = COMPLEX_PATTERNS.iter().find(|re| re.is_match(query)) {
        (
            Complexity::Complex,
            format!("matches multi-step pattern /{}/", re.as_str()),
        )
    } else {
        let score = complexity_score(query);
        let complexity = if score <= SIMPLE_SCORE_LIMIT {
            Complexity::Simple
        } else {
            Complexity::Complex
        };
        (complexity, format!("heuristic score {}", score))
    };

    let mut verdict = ComplexityVerdict::new(complexity, &reason, default_strategy(complexity));
    verdict.heuristic = true;
    verdict
}

fn default_strategy(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Simple => "answer directly",
        Complexity::Complex => "decompose into a task graph",
    }
}

#[derive(Clone, Default)]
pub struct ComplexityClassifier {
    generator: Option<StructuredGenerator>,
}

impl ComplexityClassifier {
    pub fn new(generator: StructuredGenerator) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    /// A classifier that always uses the heuristic.
    pub fn heuristic_only() -> Self {
        Self { generator: None }
    }

    /// Decide how `query` should be routed.
    ///
    /// # Errors
    ///
    /// Only a blank query is an error. Model failures fall back to the
    /// heuristic.
    pub async fn classify(&self, query: &str) -> Result<ComplexityVerdict> {
        if query.trim().is_empty() {
            return Err(Error::Classification("query text is empty".into()));
        }

        let Some(generator) = &self.generator else {
            return Ok(heuristic_verdict(query));
        };

        match generator
            .generate::<ClassificationReply>(Role::Master, &[("query", query)])
            .await
        {
            Ok(reply) => {
                let verdict = verdict_from(reply);
                info!(complexity = %verdict.complexity, reason = %verdict.reason, "query classified");
                Ok(verdict)
            }
            Err(e) => {
                warn!(error = %e, "classification unavailable, using heuristic");
                let verdict = heuristic_verdict(query);
                debug!(complexity = %verdict.complexity, reason = %verdict.reason, "heuristic verdict");
                Ok(verdict)
            }
        }
    }
}

fn verdict_from(reply: ClassificationReply) -> ComplexityVerdict {
    let strategy = if reply.strategy.trim().is_empty() {
        default_strategy(reply.complexity)
    } else {
        reply.strategy.as_str()
    };
    ComplexityVerdict::new(reply.complexity, &reply.reason, strategy)
}
