//! Answer synthesis from completed node results.
//!
//! Results are flattened into claims: every scalar field of an object
//! payload is a keyed claim, any other payload is one unkeyed claim.
//! Keyed claims are scoped to a subject: the entity the payload names
//! (`name`, `entity`, ...) or, failing that, the node that produced it.
//! Identical claims collapse into one; claims about the same subject with
//! the same key and different values are reported as contradictions in the
//! answer text and metadata instead of being dropped.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capability::{Role, StructuredGenerator, WriterReply, DEFAULT_CONFIDENCE};
use crate::core::{AnswerMetadata, Contradiction, FinalAnswer, TaskResult};
use crate::error::{Error, Result};

/// Confidence multiplier applied when sources disagree.
const CONTRADICTION_PENALTY: f64 = 0.8;

/// Payload fields that describe a result rather than state a fact.
const META_KEYS: &[&str] = &["confidence", "source", "sources", "metadata"];

/// Payload fields that name the entity the other fields describe.
const ENTITY_KEYS: &[&str] = &["name", "entity", "subject", "title"];

/// One statement extracted from a result payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub key: Option<String>,
    pub value: String,
    /// Capability (or node, if none recorded) that produced the claim.
    pub source: String,
    /// Entity named by the payload, if any.
    pub entity: Option<String>,
    /// Node whose result carried the claim.
    pub node: String,
}

impl Claim {
    /// What a keyed claim is about.
    pub fn subject(&self) -> &str {
        self.entity.as_deref().unwrap_or(&self.node)
    }

    fn label(&self) -> Option<String> {
        let key = self.key.as_ref()?;
        Some(match &self.entity {
            Some(e) => format!("{} {}", e, key),
            None => key.clone(),
        })
    }

    fn render(&self) -> String {
        match self.label() {
            Some(l) => format!("{}: {} ({})", l, self.value, self.source),
            None => format!("{} ({})", self.value, self.source),
        }
    }

    fn same_statement(&self, other: &Claim) -> bool {
        self.key.as_deref().map(normalize) == other.key.as_deref().map(normalize)
            && (self.key.is_none() || normalize(self.subject()) == normalize(other.subject()))
    }
}

#[derive(Clone)]
pub struct ResultSynthesizer {
    generator: Option<StructuredGenerator>,
    degraded_threshold: f64,
}

impl ResultSynthesizer {
    pub fn new(generator: Option<StructuredGenerator>, degraded_threshold: f64) -> Self {
        Self {
            generator,
            degraded_threshold,
        }
    }

    pub fn degraded_threshold(&self) -> f64 {
        self.degraded_threshold
    }

    /// Merge succeeded results into one answer.
    ///
    /// Failed results in `results` are ignored; callers state them as
    /// `caveats`. Only a blank query is an error.
    pub async fn synthesize(
        &self,
        query: &str,
        results: &[TaskResult],
        caveats: &[String],
    ) -> Result<FinalAnswer> {
        if query.trim().is_empty() {
            return Err(Error::Synthesis("query text is missing".into()));
        }

        let succeeded: Vec<&TaskResult> = results.iter().filter(|r| r.success).collect();
        if succeeded.is_empty() {
            warn!(caveats = caveats.len(), "no successful results to synthesize");
            return Ok(self.unresolved(query, caveats));
        }

        let claims = dedupe_claims(succeeded.iter().flat_map(|r| extract_claims(r)).collect());
        let contradictions = find_contradictions(&claims);
        let sources = collect_sources(&succeeded);

        let mean = succeeded.iter().map(|r| r.confidence).sum::<f64>() / succeeded.len() as f64;
        let coverage = succeeded.len() as f64 / (succeeded.len() + caveats.len()) as f64;
        let mut confidence = mean * coverage;
        if !contradictions.is_empty() {
            confidence *= CONTRADICTION_PENALTY;
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let claim_lines: Vec<String> = claims.iter().map(Claim::render).collect();
        let mut text = match self.write(query, &claim_lines, caveats).await {
            Some(t) => t,
            None => template_answer(query, &claim_lines),
        };
        append_notes(&mut text, &contradictions, caveats);

        let degraded = !caveats.is_empty() || confidence < self.degraded_threshold;
        info!(
            claims = claims.len(),
            contradictions = contradictions.len(),
            confidence,
            degraded,
            "answer synthesized"
        );

        Ok(FinalAnswer {
            text,
            sources,
            confidence,
            metadata: AnswerMetadata {
                degraded,
                succeeded_tasks: succeeded.len(),
                caveats: caveats.to_vec(),
                contradictions,
                ..Default::default()
            },
        })
    }

    /// Answer a simple query in one writer call, with no sub-tasks.
    pub async fn answer_directly(&self, query: &str) -> Result<FinalAnswer> {
        if query.trim().is_empty() {
            return Err(Error::Synthesis("query text is missing".into()));
        }
        let Some(generator) = &self.generator else {
            return Ok(self.unresolved(query, &["no writer capability configured".to_string()]));
        };

        let response = generator
            .generate::<WriterReply>(
                Role::Writer,
                &[
                    ("query", query),
                    ("task_results", "(answer directly from general knowledge)"),
                    ("caveats", "(none)"),
                ],
            )
            .await;

        match response {
            Ok(reply) => {
                let text = reply.answer.trim().to_string();
                if text.is_empty() {
                    return Ok(self.unresolved(query, &["writer returned an empty answer".to_string()]));
                }
                let confidence = reply.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0);
                Ok(FinalAnswer {
                    text,
                    sources: vec![crate::capability::LlmTool::NAME.to_string()],
                    confidence,
                    metadata: AnswerMetadata {
                        degraded: confidence < self.degraded_threshold,
                        ..Default::default()
                    },
                })
            }
            Err(e) => {
                warn!(error = %e, "direct answer failed");
                Ok(self.unresolved(query, &[format!("writer unavailable: {}", e)]))
            }
        }
    }

    fn unresolved(&self, query: &str, caveats: &[String]) -> FinalAnswer {
        let mut text = format!("The query could not be fully resolved: {}", query.trim());
        append_notes(&mut text, &[], caveats);
        FinalAnswer {
            text,
            sources: Vec::new(),
            confidence: 0.0,
            metadata: AnswerMetadata {
                degraded: true,
                caveats: caveats.to_vec(),
                ..Default::default()
            },
        }
    }

    async fn write(&self, query: &str, claims: &[String], caveats: &[String]) -> Option<String> {
        let generator = self.generator.as_ref()?;
        let results = claims.join("\n");
        let caveats = if caveats.is_empty() {
            "(none)".to_string()
        } else {
            caveats.join("\n")
        };
        match generator
            .generate::<WriterReply>(
                Role::Writer,
                &[
                    ("query", query),
                    ("task_results", results.as_str()),
                    ("caveats", caveats.as_str()),
                ],
            )
            .await
        {
            Ok(reply) => Some(reply.answer.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                warn!(error = %e, "writer unavailable, using template answer");
                None
            }
        }
    }
}

fn template_answer(query: &str, claims: &[String]) -> String {
    let mut text = format!("Findings for \"{}\":", query.trim());
    for c in claims {
        text.push_str("\n- ");
        text.push_str(c);
    }
    text
}

fn append_notes(text: &mut String, contradictions: &[Contradiction], caveats: &[String]) {
    if !contradictions.is_empty() {
        text.push_str("\n\nSources disagree:");
        for c in contradictions {
            let values: Vec<String> = c
                .values
                .iter()
                .map(|(source, value)| format!("{} says {}", source, value))
                .collect();
            text.push_str(&format!("\n- {}: {}", c.claim, values.join("; ")));
        }
    }
    if !caveats.is_empty() {
        text.push_str("\n\nCaveats:");
        for c in caveats {
            text.push_str("\n- ");
            text.push_str(c);
        }
    }
}

/// Flatten a result's payload into claims.
pub fn extract_claims(result: &TaskResult) -> Vec<Claim> {
    let source = result
        .tool_used
        .clone()
        .unwrap_or_else(|| result.node_id.to_string());
    let node = result.node_id.to_string();
    let claim = |key: Option<String>, value: String, entity: Option<String>| Claim {
        key,
        value,
        source: source.clone(),
        entity,
        node: node.clone(),
    };
    match &result.payload {
        Value::Null => Vec::new(),
        Value::Object(map) => {
            let entity_key = ENTITY_KEYS
                .iter()
                .find(|k| map.get(**k).and_then(scalar_text).is_some())
                .copied();
            let entity = entity_key.and_then(|k| map.get(k)).and_then(scalar_text);
            let mut claims: Vec<Claim> = map
                .iter()
                .filter(|(k, _)| !META_KEYS.contains(&k.as_str()) && Some(k.as_str()) != entity_key)
                .filter_map(|(k, v)| scalar_text(v).map(|value| claim(Some(k.clone()), value, entity.clone())))
                .collect();
            if claims.is_empty() {
                claims.extend(entity.map(|e| claim(None, e, None)));
            }
            claims
        }
        other => scalar_text(other)
            .map(|value| claim(None, value, None))
            .into_iter()
            .collect(),
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    let text = match v {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Drop claims that repeat an earlier claim's key and value.
pub fn dedupe_claims(claims: Vec<Claim>) -> Vec<Claim> {
    let mut kept: Vec<Claim> = Vec::new();
    for claim in claims {
        let dup = kept
            .iter()
            .any(|k| k.same_statement(&claim) && normalize(&k.value) == normalize(&claim.value));
        if dup {
            debug!(value = %claim.value, source = %claim.source, "duplicate claim dropped");
        } else {
            kept.push(claim);
        }
    }
    kept
}

/// Keyed claims about the same subject whose values differ.
pub fn find_contradictions(claims: &[Claim]) -> Vec<Contradiction> {
    let mut out: Vec<Contradiction> = Vec::new();
    let mut seen: Vec<&Claim> = Vec::new();
    for claim in claims.iter().filter(|c| c.key.is_some()) {
        if seen.iter().any(|s| s.same_statement(claim)) {
            continue;
        }
        seen.push(claim);
        let same: Vec<&Claim> = claims.iter().filter(|c| c.same_statement(claim)).collect();
        let distinct = same
            .iter()
            .map(|c| normalize(&c.value))
            .collect::<std::collections::HashSet<_>>();
        if distinct.len() > 1 {
            out.push(Contradiction {
                claim: claim.label().unwrap_or_default(),
                values: same.iter().map(|c| (c.source.clone(), c.value.clone())).collect(),
            });
        }
    }
    out
}

fn collect_sources(results: &[&TaskResult]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for r in results {
        if let Some(tool) = &r.tool_used {
            if !sources.contains(tool) {
                sources.push(tool.clone());
            }
        }
    }
    sources
}
