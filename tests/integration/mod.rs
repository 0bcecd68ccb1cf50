//! Integration test suite for the query swarm.
//!
//! These tests drive [`SwarmCoordinator`](query_swarm::SwarmCoordinator)
//! end to end with a scripted language model and instrumented tools, so
//! they make no network calls and are safe to run in CI.
//!
//! # Test Categories
//!
//! - `routing`: simple vs complex routing and plan failures
//! - `parallel_tasks`: concurrency of independent nodes and worker ceilings
//! - `recovery`: capability fallback, skip propagation, panics
//! - `lifecycle`: cancellation, deadlines, shutdown and metrics

mod fixtures;

mod lifecycle;
mod parallel_tasks;
mod recovery;
mod routing;
