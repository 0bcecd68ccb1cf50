//! Recovery tests: capability fallback, failure propagation and panic
//! containment.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

use query_swarm::core::TaskKind;
use query_swarm::orchestration::SchedulerEvent;
use query_swarm::SwarmCoordinator;

use crate::fixtures::{
    comparison_plan, independent_plan, swarm, test_config, ProbeLog, ProbeTool, ScriptedModel, FAIL_MARKER,
    PANIC_MARKER,
};

/// Test: Fallback capability
/// Given a primary search tool that always fails and a working backup
/// When a search node runs
/// Then the node succeeds through the backup and the answer cites it
#[tokio::test]
async fn test_fallback_capability_used() {
    let model = Arc::new(ScriptedModel::complex(independent_plan(1)));
    let log = Arc::new(ProbeLog::default());
    let (tx, mut rx) = mpsc::channel(32);
    let swarm = SwarmCoordinator::builder(test_config())
        .generator(model.clone())
        .tool(ProbeTool::new("primary", &log).always_failing().arc())
        .tool(ProbeTool::new("backup", &log).arc())
        .events(tx)
        .build()
        .unwrap();

    let answer = swarm.submit("compare one thing").await;

    assert!(!answer.is_degraded(), "caveats: {:?}", answer.metadata.caveats);
    assert_eq!(answer.sources, vec!["backup"]);
    let tools: Vec<String> = log.runs().into_iter().map(|r| r.tool).collect();
    assert_eq!(tools, vec!["primary", "backup"]);

    drop(swarm);
    let mut succeeded_with = None;
    while let Some(event) = rx.recv().await {
        if let SchedulerEvent::NodeSucceeded { tool, .. } = event {
            succeeded_with = tool;
        }
    }
    assert_eq!(succeeded_with.as_deref(), Some("backup"));
}

/// Test: Configured fallback order
/// Given tools registered as [backup, primary] but configured as [primary, backup]
/// When a search node runs
/// Then primary is tried first
#[tokio::test]
async fn test_configured_fallback_order_wins() {
    let mut config = test_config();
    config.tools.fallback.insert(
        "search".to_string(),
        vec!["primary".to_string(), "backup".to_string()],
    );
    let model = Arc::new(ScriptedModel::complex(independent_plan(1)));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(
        config,
        &model,
        vec![
            ProbeTool::new("backup", &log).arc(),
            ProbeTool::new("primary", &log).always_failing().arc(),
        ],
    );

    let answer = swarm.submit("compare one thing").await;

    assert_eq!(answer.sources, vec!["backup"]);
    assert_eq!(log.runs()[0].tool, "primary");
}

/// Test: Failure skips dependents
/// Given s1 fails on every capability and c1 depends on s1 and s2
/// When the query runs
/// Then c1 never runs and the answer is degraded with both caveats
#[tokio::test]
async fn test_failed_node_skips_dependents() {
    let model = Arc::new(ScriptedModel::complex(json!({
        "tasks": [
            {"id": "s1", "type": "search", "description": format!("{} 汉武大帝的出生年份", FAIL_MARKER)},
            {"id": "s2", "type": "search", "description": "凯撒大帝的出生年份"},
            {"id": "c1", "type": "compare", "description": "比较两人的年龄"}
        ],
        "dependencies": {"c1": ["s1", "s2"]}
    })));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(test_config(), &model, vec![ProbeTool::new("web", &log).arc()]);

    let answer = swarm.submit("汉武大帝和凯撒大帝谁更年长？").await;

    assert!(log.run("c1").is_none());
    assert!(answer.is_degraded());
    assert_eq!(answer.metadata.succeeded_tasks, 1);
    assert_eq!(answer.metadata.failed_tasks, 1);
    assert_eq!(answer.metadata.skipped_tasks, 1);
    let caveats = answer.metadata.caveats.join("\n");
    assert!(caveats.contains("s1") && caveats.contains("failed"));
    assert!(caveats.contains("c1") && caveats.contains("skipped"));
    assert!(answer.text.contains("Caveats:"));
    assert_eq!(answer.sources, vec!["web"]);
}

/// Test: Nothing succeeded
/// Given every node fails
/// When the query runs
/// Then the answer says it could not be resolved, with zero confidence
#[tokio::test]
async fn test_all_nodes_failed() {
    let model = Arc::new(ScriptedModel::complex(json!({
        "tasks": [
            {"id": "a", "type": "search", "description": format!("{} a", FAIL_MARKER)},
            {"id": "b", "type": "search", "description": format!("{} b", FAIL_MARKER)}
        ],
        "dependencies": {}
    })));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(test_config(), &model, vec![ProbeTool::new("web", &log).arc()]);

    let answer = swarm.submit("compare a and b").await;

    assert!(answer.is_degraded());
    assert_eq!(answer.confidence, 0.0);
    assert!(answer.sources.is_empty());
    assert!(answer.text.contains("could not be fully resolved"));
    assert_eq!(answer.metadata.caveats.len(), 2);
}

/// Test: Panicking capability
/// Given a tool that panics on one node
/// When the query runs
/// Then that node fails, the other succeeds, and the swarm keeps working
#[tokio::test]
async fn test_tool_panic_contained() {
    let model = Arc::new(ScriptedModel::complex(json!({
        "tasks": [
            {"id": "a", "type": "search", "description": format!("{} a", PANIC_MARKER)},
            {"id": "b", "type": "search", "description": "b"}
        ],
        "dependencies": {}
    })));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(test_config(), &model, vec![ProbeTool::new("web", &log).arc()]);

    let answer = swarm.submit("compare a and b").await;

    assert_eq!(answer.metadata.failed_tasks, 1);
    assert_eq!(answer.metadata.succeeded_tasks, 1);
    assert!(answer.metadata.caveats[0].contains("task a"));

    let again = swarm.submit("compare a and b").await;
    assert_eq!(again.metadata.succeeded_tasks, 1);
    assert_eq!(swarm.metrics().total_queries, 2);
}

/// Test: Panicking pipeline stage
/// Given a planner that panics
/// When the query runs
/// Then a degraded answer comes back and the admission slot is released
#[tokio::test]
async fn test_planner_panic_contained() {
    let model = Arc::new(ScriptedModel::complex(independent_plan(1)).panicking_planner());
    let swarm = swarm(test_config(), &model, Vec::new());

    let answer = swarm.submit("compare one thing").await;

    assert!(answer.is_degraded());
    assert!(answer.metadata.caveats[0].contains("internal error"));
    let m = swarm.metrics();
    assert_eq!((m.failed, m.active_tasks), (1, 0));
}

/// Test: No capability for a kind
/// Given tools that only handle search
/// When a plan needs a compare node
/// Then the compare node fails and the searches still count
#[tokio::test]
async fn test_missing_capability_fails_node() {
    let model = Arc::new(ScriptedModel::complex(comparison_plan()));
    let log = Arc::new(ProbeLog::default());
    let tool = ProbeTool::new("web", &log).kinds(&[TaskKind::Search]);
    let swarm = swarm(test_config(), &model, vec![tool.arc()]);

    let answer = swarm.submit("汉武大帝和凯撒大帝谁更年长？").await;

    assert_eq!(answer.metadata.succeeded_tasks, 2);
    assert_eq!(answer.metadata.failed_tasks, 1);
    assert!(answer.is_degraded());
    assert!(answer.metadata.caveats[0].contains("c1"));
    assert!(log.run("c1").is_none());
}
