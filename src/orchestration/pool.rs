//! Worker pool for per-query node execution.
//!
//! The `WorkerPool` tracks which nodes of one query's graph currently hold a
//! worker slot, enforcing the configured ceiling. It records the highest
//! occupancy it has seen so callers can verify the ceiling held.

use crate::core::NodeId;
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Bounded set of worker slots, one per running node.
///
/// # Example
///
/// ```ignore
/// use query_swarm::orchestration::WorkerPool;
///
/// let mut pool = WorkerPool::new(2);
/// pool.admit(&"s1".into())?;
/// assert!(pool.has_capacity());
/// assert_eq!(pool.active_count(), 1);
/// ```
#[derive(Debug)]
pub struct WorkerPool {
    /// Nodes currently holding a slot.
    active: HashSet<NodeId>,
    /// Maximum number of concurrent workers allowed.
    max_concurrent: usize,
    high_water: usize,
}

impl WorkerPool {
    /// Create a pool with the given ceiling. A ceiling of 0 is raised to 1
    /// so a graph can always make progress.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            active: HashSet::new(),
            max_concurrent: max_concurrent.max(1),
            high_water: 0,
        }
    }

    /// Give `node` a slot.
    ///
    /// # Errors
    ///
    /// Returns `PoolFull` if every slot is taken. Admitting a node that
    /// already holds a slot is a no-op.
    pub fn admit(&mut self, node: &NodeId) -> Result<()> {
        if self.active.contains(node) {
            return Ok(());
        }
        if !self.has_capacity() {
            return Err(Error::PoolFull {
                max: self.max_concurrent,
            });
        }
        self.active.insert(node.clone());
        self.high_water = self.high_water.max(self.active.len());
        Ok(())
    }

    /// Free the slot held by `node`. Returns whether it held one.
    pub fn release(&mut self, node: &NodeId) -> bool {
        self.active.remove(node)
    }

    pub fn has_capacity(&self) -> bool {
        self.active.len() < self.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn available(&self) -> usize {
        self.max_concurrent - self.active.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Highest number of simultaneously held slots since creation.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn is_active(&self, node: &NodeId) -> bool {
        self.active.contains(node)
    }

    /// Nodes holding a slot, sorted for stable output.
    pub fn active_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.active.iter().cloned().collect();
        nodes.sort();
        nodes
    }
}
