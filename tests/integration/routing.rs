//! Routing tests: simple queries skip planning, complex ones go through
//! the full graph, and bad plans come back as degraded answers.

use serde_json::json;
use std::sync::Arc;

use query_swarm::capability::Role;
use query_swarm::core::Complexity;
use query_swarm::SwarmCoordinator;

use crate::fixtures::{
    comparison_plan, swarm, test_config, ProbeLog, ProbeTool, ScriptedModel,
};

/// Test: Simple query answered directly
/// Given a query the model calls simple
/// When it is submitted
/// Then the planner is never called and the writer answers alone
#[tokio::test]
async fn test_simple_query_skips_planner() {
    let model = Arc::new(ScriptedModel::simple());
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(test_config(), &model, vec![ProbeTool::new("web", &log).arc()]);

    let answer = swarm.submit("北京有什么好玩的景点？").await;

    assert_eq!(model.calls(Role::Planner), 0);
    assert_eq!(model.calls(Role::Writer), 1);
    assert!(log.runs().is_empty(), "no task node should run");
    assert!(!answer.is_degraded());
    assert_eq!(answer.text, "scripted answer");
    assert_eq!(answer.sources, vec!["llm"]);
    assert_eq!(answer.metadata.complexity, Some(Complexity::Simple));
    assert!(answer.metadata.query_id.is_some());
}

/// Test: Complex query runs the whole pipeline
/// Given a comparison query and a two-search plan
/// When it is submitted
/// Then all three nodes succeed and the answer cites the tool
#[tokio::test]
async fn test_complex_query_runs_graph() {
    let model = Arc::new(ScriptedModel::complex(comparison_plan()));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(test_config(), &model, vec![ProbeTool::new("web", &log).arc()]);

    let answer = swarm.submit("汉武大帝和凯撒大帝谁更年长？").await;

    assert_eq!(model.calls(Role::Planner), 1);
    assert!(!answer.is_degraded(), "caveats: {:?}", answer.metadata.caveats);
    assert_eq!(answer.metadata.complexity, Some(Complexity::Complex));
    assert_eq!(answer.metadata.task_count, 3);
    assert_eq!(answer.metadata.succeeded_tasks, 3);
    assert_eq!(answer.metadata.failed_tasks, 0);
    assert_eq!(answer.sources, vec!["web"]);
    assert!(answer.confidence >= swarm.config().degraded_threshold);
}

/// Test: Cyclic plan
/// Given a planner that returns a -> b -> a
/// When the query is submitted
/// Then the answer is degraded and names the cycle
#[tokio::test]
async fn test_cyclic_plan_degrades() {
    let model = Arc::new(ScriptedModel::complex(json!({
        "tasks": [
            {"id": "a", "type": "search", "description": "a"},
            {"id": "b", "type": "search", "description": "b"}
        ],
        "dependencies": {"a": ["b"], "b": ["a"]}
    })));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(test_config(), &model, vec![ProbeTool::new("web", &log).arc()]);

    let answer = swarm.submit("compare a and b").await;

    assert!(answer.is_degraded());
    assert_eq!(answer.confidence, 0.0);
    assert!(answer.metadata.caveats.iter().any(|c| c.contains("cycle")));
    assert!(log.runs().is_empty());
    assert_eq!(swarm.metrics().failed, 1);
}

/// Test: Planner returns something that is not a plan
/// Given a planner answer that fails the plan schema twice
/// When the query is submitted
/// Then the answer is degraded rather than an error
#[tokio::test]
async fn test_malformed_plan_degrades() {
    let model = Arc::new(ScriptedModel::complex(json!({"steps": ["look it up"]})));
    let swarm = swarm(test_config(), &model, Vec::new());

    let answer = swarm.submit("plan a trip to Xi'an and Luoyang").await;

    assert!(answer.is_degraded());
    assert!(answer.metadata.caveats[0].contains("plan"));
    // One retry on schema violation.
    assert_eq!(model.calls(Role::Planner), 2);
}

/// Test: No model configured
/// Given a swarm with no generator
/// When a complex query is submitted
/// Then the heuristic routes it and the missing planner degrades the answer
#[tokio::test]
async fn test_no_model_uses_heuristic() {
    let swarm = SwarmCoordinator::builder(test_config()).build().unwrap();

    let answer = swarm.submit("汉武大帝和凯撒大帝谁更年长？").await;

    assert!(answer.is_degraded());
    assert!(answer.metadata.caveats[0].contains("planner"));
}
