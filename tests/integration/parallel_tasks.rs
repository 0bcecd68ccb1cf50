//! Parallel execution correctness tests.
//!
//! These verify that independent nodes overlap, dependents wait for their
//! inputs, and neither ceiling is ever exceeded.

use std::sync::Arc;
use std::time::Duration;

use query_swarm::capability::Role;

use crate::fixtures::{
    comparison_plan, independent_plan, swarm, test_config, ProbeLog, ProbeTool, ScriptedModel,
};

/// Test: Independent searches overlap
/// Given two searches with no dependency between them
/// When the comparison query runs
/// Then both start before either finishes, and compare starts after both
#[tokio::test]
async fn test_independent_searches_run_concurrently() {
    let model = Arc::new(ScriptedModel::complex(comparison_plan()));
    let log = Arc::new(ProbeLog::default());
    let tool = ProbeTool::new("web", &log).delay(Duration::from_millis(100));
    let swarm = swarm(test_config(), &model, vec![tool.arc()]);

    let answer = swarm.submit("汉武大帝和凯撒大帝谁更年长？").await;
    assert!(!answer.is_degraded(), "caveats: {:?}", answer.metadata.caveats);

    let s1 = log.run("s1").expect("s1 ran");
    let s2 = log.run("s2").expect("s2 ran");
    let c1 = log.run("c1").expect("c1 ran");

    let first_end = s1.end.unwrap().min(s2.end.unwrap());
    assert!(s1.start < first_end && s2.start < first_end, "searches should overlap");
    assert!(c1.start >= s1.end.unwrap() && c1.start >= s2.end.unwrap());
    assert_eq!(c1.inputs, 2, "compare should see both search results");
    assert_eq!(log.peak_concurrency(), 2);
}

/// Test: Worker ceiling
/// Given six independent nodes and max_concurrent_tasks = 2
/// When the query runs
/// Then no more than two nodes are ever in flight
#[tokio::test]
async fn test_worker_ceiling_respected() {
    let mut config = test_config();
    config.max_concurrent_tasks = 2;
    let model = Arc::new(ScriptedModel::complex(independent_plan(6)));
    let log = Arc::new(ProbeLog::default());
    let tool = ProbeTool::new("web", &log).delay(Duration::from_millis(30));
    let swarm = swarm(config, &model, vec![tool.arc()]);

    let answer = swarm.submit("compare six things").await;

    assert_eq!(answer.metadata.succeeded_tasks, 6);
    assert_eq!(log.runs().len(), 6);
    assert_eq!(log.peak_concurrency(), 2);
}

/// Test: Query admission ceiling
/// Given max_concurrent_queries = 1 and a slow writer
/// When three simple queries are submitted at once
/// Then the writer never sees two of them at the same time
#[tokio::test]
async fn test_query_ceiling_respected() {
    let mut config = test_config();
    config.max_concurrent_queries = 1;
    let model = Arc::new(ScriptedModel::simple().writer_delay(Duration::from_millis(40)));
    let swarm = swarm(config, &model, Vec::new());

    let (a, b, c) = tokio::join!(
        swarm.submit("上海的美食"),
        swarm.submit("北京有什么景点"),
        swarm.submit("汉武帝是谁"),
    );

    assert!(!a.is_degraded() && !b.is_degraded() && !c.is_degraded());
    assert_eq!(model.calls(Role::Writer), 3);
    assert_eq!(model.peak_writers(), 1);
    let m = swarm.metrics();
    assert_eq!((m.active_tasks, m.queued), (0, 0));
}

/// Test: Queued queries are visible in the status
/// Given max_concurrent_queries = 1 and one query holding the slot
/// When a second query is waiting
/// Then the status reports one active and one queued
#[tokio::test]
async fn test_status_reports_queued() {
    let mut config = test_config();
    config.max_concurrent_queries = 1;
    let model = Arc::new(ScriptedModel::simple().writer_delay(Duration::from_millis(200)));
    let swarm = swarm(config, &model, Vec::new());

    let first = tokio::spawn({
        let swarm = swarm.clone();
        async move { swarm.submit("上海的美食").await }
    });
    let second = tokio::spawn({
        let swarm = swarm.clone();
        async move { swarm.submit("汉武帝是谁").await }
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    let status = swarm.status();
    assert_eq!(status.active_tasks, 1);
    assert_eq!(status.queued, 1);
    assert_eq!(status.state, query_swarm::orchestration::SwarmState::Busy);

    first.await.unwrap();
    second.await.unwrap();
    assert_eq!(swarm.status().state, query_swarm::orchestration::SwarmState::Idle);
}
