//! Lifecycle tests: cancellation, deadlines, shutdown and the metrics they
//! leave behind.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use query_swarm::orchestration::SwarmState;

use crate::fixtures::{
    swarm, test_config, ProbeLog, ProbeTool, ScriptedModel, BROKEN_WRITER,
};

fn fast_and_slow_plan() -> serde_json::Value {
    json!({
        "tasks": [
            {"id": "fast", "type": "search", "description": "quick lookup"},
            {"id": "slow", "type": "search", "description": "slow lookup"}
        ],
        "dependencies": {}
    })
}

fn slow_tool(log: &Arc<ProbeLog>) -> ProbeTool {
    ProbeTool::new("web", log)
        .delay(Duration::from_millis(10))
        .slow_on("slow", Duration::from_secs(5))
}

/// Test: Caller cancellation
/// Given one fast node and one node that takes seconds
/// When the caller cancels mid-flight
/// Then the answer comes back promptly with the fast node's result
#[tokio::test]
async fn test_cancel_returns_partial_results() {
    let model = Arc::new(ScriptedModel::complex(fast_and_slow_plan()));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(test_config(), &model, vec![slow_tool(&log).arc()]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let answer = swarm.submit_with_cancel("compare fast and slow", cancel).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(answer.metadata.cancelled);
    assert!(answer.is_degraded());
    assert_eq!(answer.metadata.succeeded_tasks, 1);
    assert_eq!(answer.metadata.failed_tasks, 1);
    assert_eq!(answer.sources, vec!["web"]);
    assert!(answer.metadata.caveats[0].contains("query cancelled"));
}

/// Test: Query deadline
/// Given query_timeout_secs = 1 and a node that takes seconds
/// When the query runs
/// Then it stops at the deadline with partial results
#[tokio::test]
async fn test_deadline_stops_query() {
    let mut config = test_config();
    config.query_timeout_secs = 1;
    let model = Arc::new(ScriptedModel::complex(fast_and_slow_plan()));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(config, &model, vec![slow_tool(&log).arc()]);

    let started = Instant::now();
    let answer = swarm.submit("compare fast and slow").await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(answer.metadata.cancelled);
    assert!(answer.metadata.caveats[0].contains("deadline exceeded"));
    assert_eq!(answer.metadata.succeeded_tasks, 1);
}

/// Test: Cancelled while queued
/// Given the only admission slot is taken
/// When a waiting query is cancelled
/// Then it is turned away without ever being admitted
#[tokio::test]
async fn test_cancel_before_admission() {
    let mut config = test_config();
    config.max_concurrent_queries = 1;
    let model = Arc::new(ScriptedModel::simple().writer_delay(Duration::from_millis(200)));
    let swarm = swarm(config, &model, Vec::new());

    let holder = tokio::spawn({
        let swarm = swarm.clone();
        async move { swarm.submit("上海的美食").await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let answer = swarm.submit_with_cancel("汉武帝是谁", cancel).await;

    assert!(answer.is_degraded());
    assert!(answer.metadata.caveats[0].contains("before admission"));
    assert!(!holder.await.unwrap().is_degraded());
    let m = swarm.metrics();
    assert_eq!((m.succeeded, m.failed, m.queued), (1, 1, 0));
}

/// Test: Caller drops the query
/// Given a node that takes seconds
/// When the caller gives up on `submit` before it returns
/// Then the swarm goes back to idle and counts the query as failed
#[tokio::test]
async fn test_abandoned_query_releases_counters() {
    let model = Arc::new(ScriptedModel::complex(fast_and_slow_plan()));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(test_config(), &model, vec![slow_tool(&log).arc()]);

    let gave_up = tokio::time::timeout(
        Duration::from_millis(100),
        swarm.submit("compare fast and slow"),
    )
    .await;
    assert!(gave_up.is_err());

    let status = swarm.status();
    assert_eq!(status.state, SwarmState::Idle);
    assert_eq!((status.active_tasks, status.queued), (0, 0));
    assert_eq!((status.total_queries, status.succeeded, status.failed), (1, 0, 1));
}

/// Test: Shutdown
/// Given a query in flight
/// When the swarm shuts down
/// Then the in-flight query ends with partial results and new queries are rejected
#[tokio::test]
async fn test_shutdown_cancels_and_rejects() {
    let model = Arc::new(ScriptedModel::complex(fast_and_slow_plan()));
    let log = Arc::new(ProbeLog::default());
    let swarm = swarm(test_config(), &model, vec![slow_tool(&log).arc()]);

    let in_flight = tokio::spawn({
        let swarm = swarm.clone();
        async move { swarm.submit("compare fast and slow").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    swarm.shutdown().await;
    assert!(swarm.is_shutting_down());
    assert_eq!(swarm.state(), SwarmState::ShuttingDown);

    let partial = in_flight.await.unwrap();
    assert!(partial.metadata.cancelled);
    assert_eq!(partial.metadata.succeeded_tasks, 1);

    let rejected = swarm.submit("compare fast and slow").await;
    assert!(rejected.is_degraded());
    assert!(rejected.metadata.caveats[0].contains("shutting down"));
    assert_eq!(swarm.metrics().failed, 2);
}

/// Test: Success rate
/// Given N queries of which K fail
/// When all have finished
/// Then success_rate is (N - K) / N
#[tokio::test]
async fn test_success_rate_tracks_failures() {
    let model = Arc::new(ScriptedModel::simple());
    let swarm = swarm(test_config(), &model, Vec::new());

    let (n, k) = (5u64, 2u64);
    for i in 0..n {
        let text = if i < k {
            format!("{} query {}", BROKEN_WRITER, i)
        } else {
            format!("query {}", i)
        };
        swarm.submit(&text).await;
    }

    let status = swarm.status();
    assert_eq!(status.total_queries, n);
    assert_eq!(status.failed, k);
    assert_eq!(status.succeeded, n - k);
    assert_eq!(status.success_rate, (n - k) as f64 / n as f64);
    assert_eq!(status.state, SwarmState::Idle);
}
