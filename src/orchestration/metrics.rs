//! Process-wide swarm counters behind one synchronized accessor.

use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::warn;

/// Point-in-time copy of the swarm counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SwarmMetrics {
    pub total_queries: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Queries admitted and executing.
    pub active_tasks: usize,
    /// Queries waiting for admission.
    pub queued: usize,
    pub total_latency: Duration,
    pub uptime: Duration,
}

impl SwarmMetrics {
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Mean latency over completed queries.
    pub fn avg_latency(&self) -> Duration {
        match self.completed() {
            0 => Duration::ZERO,
            n => self.total_latency / n as u32,
        }
    }

    /// Succeeded over submitted; 0 before the first query.
    pub fn success_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total_queries as f64
        }
    }
}

/// Owner of the live counters. All mutation takes the write lock; readers
/// get a consistent snapshot.
#[derive(Debug)]
pub struct MetricsAggregator {
    inner: RwLock<SwarmMetrics>,
    started: Instant,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SwarmMetrics::default()),
            started: Instant::now(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut SwarmMetrics)) {
        // A panic while holding the lock cannot leave the counters torn,
        // so a poisoned lock is still usable.
        let mut m = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut m);
    }

    /// Book a new query as submitted. The returned slot settles the
    /// counters when it is finished or dropped.
    pub fn begin(&self) -> QuerySlot<'_> {
        self.record_submitted();
        QuerySlot {
            metrics: self,
            started: Instant::now(),
            admitted: false,
            settled: false,
        }
    }

    /// A query arrived and is waiting for admission.
    pub fn record_submitted(&self) {
        self.update(|m| {
            m.total_queries += 1;
            m.queued += 1;
        });
    }

    /// A waiting query got a slot.
    pub fn record_admitted(&self) {
        self.update(|m| {
            m.queued = m.queued.saturating_sub(1);
            m.active_tasks += 1;
        });
    }

    /// A query finished. `was_admitted` is false for queries turned away
    /// while still waiting.
    pub fn record_finished(&self, was_admitted: bool, success: bool, latency: Duration) {
        self.update(|m| {
            if was_admitted {
                m.active_tasks = m.active_tasks.saturating_sub(1);
            } else {
                m.queued = m.queued.saturating_sub(1);
            }
            if success {
                m.succeeded += 1;
            } else {
                m.failed += 1;
            }
            m.total_latency += latency;
        });
    }

    pub fn snapshot(&self) -> SwarmMetrics {
        let mut m = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        m.uptime = self.started.elapsed();
        m
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// One query's claim on the queued/active counters.
///
/// Dropping an unsettled slot (the caller abandoned the query future)
/// records the query as failed.
pub struct QuerySlot<'a> {
    metrics: &'a MetricsAggregator,
    started: Instant,
    admitted: bool,
    settled: bool,
}

impl QuerySlot<'_> {
    pub fn admit(&mut self) {
        if !self.admitted {
            self.metrics.record_admitted();
            self.admitted = true;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record the outcome and return the query's latency.
    pub fn finish(mut self, success: bool) -> Duration {
        let latency = self.started.elapsed();
        self.metrics.record_finished(self.admitted, success, latency);
        self.settled = true;
        latency
    }
}

impl Drop for QuerySlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(admitted = self.admitted, "query abandoned before finishing");
            self.metrics
                .record_finished(self.admitted, false, self.started.elapsed());
        }
    }
}
