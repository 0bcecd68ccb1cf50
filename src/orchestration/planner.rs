//! Task planning: turning a complex query into a validated [`TaskGraph`].
//!
//! The planner role of the language model lists atomic sub-questions and
//! the dependencies between them. Declared dependencies are kept as-is; on
//! top of them two rules are inferred:
//!
//! - A `compare` node that declares no dependencies depends on every
//!   `search` node declared before it.
//! - Every `generate` node depends on all leaf nodes that are not
//!   themselves `generate` nodes.
//!
//! Any problem with the plan is a [`Error::Planning`]; there is no fallback
//! plan.

use tracing::{debug, info, warn};

use crate::capability::{PlanReply, Role, StructuredGenerator};
use crate::core::{DependencyType, NodeId, Priority, TaskGraph, TaskKind, TaskNode};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct TaskPlanner {
    generator: StructuredGenerator,
}

impl TaskPlanner {
    pub fn new(generator: StructuredGenerator) -> Self {
        Self { generator }
    }

    /// Ask the model for a plan and build the graph from it.
    pub async fn plan(&self, query: &str) -> Result<TaskGraph> {
        let plan: PlanReply = self
            .generator
            .generate(Role::Planner, &[("query", query)])
            .await
            .map_err(|e| Error::Planning(format!("planner unavailable: {}", e)))?;

        let graph = graph_from_plan(&plan).map_err(into_planning)?;
        info!(
            nodes = graph.len(),
            edges = graph.dependency_count(),
            roots = graph.roots().len(),
            leaves = graph.leaves().len(),
            "plan built"
        );
        Ok(graph)
    }
}

/// Infer and validate the graph for a decoded plan.
pub fn graph_from_plan(plan: &PlanReply) -> Result<TaskGraph> {
    if plan.tasks.is_empty() {
        return Err(Error::Planning("plan contains no tasks".into()));
    }

    let mut graph = TaskGraph::new();
    for task in &plan.tasks {
        let mut node = TaskNode::new(task.id.as_str(), task.kind, &task.description);
        if let Some(p) = task.priority {
            node = node.with_priority(Priority::new(p));
        }
        graph.add_node(node)?;
    }

    // Declared edges, walked in task order so errors are deterministic.
    for (dependent, deps) in declared_in_order(plan)? {
        for dep in deps {
            let dep = NodeId::new(dep.as_str());
            if !graph.contains(&dep) {
                return Err(Error::Planning(format!(
                    "task {} depends on unknown task {}",
                    dependent, dep
                )));
            }
            graph.add_dependency(&dep, &dependent, DependencyType::Declared)?;
        }
    }

    infer_compare_dependencies(&mut graph)?;
    infer_generate_dependencies(&mut graph)?;
    graph.validate()?;
    Ok(graph)
}

fn declared_in_order(plan: &PlanReply) -> Result<Vec<(NodeId, &Vec<String>)>> {
    if let Some(unknown) = plan
        .dependencies
        .keys()
        .find(|k| !plan.tasks.iter().any(|t| &t.id == *k))
    {
        return Err(Error::Planning(format!(
            "dependencies listed for unknown task {}",
            unknown
        )));
    }
    Ok(plan
        .tasks
        .iter()
        .filter_map(|t| {
            plan.dependencies
                .get(&t.id)
                .map(|deps| (NodeId::new(t.id.as_str()), deps))
        })
        .collect())
}

fn infer_compare_dependencies(graph: &mut TaskGraph) -> Result<()> {
    let mut searches_so_far: Vec<NodeId> = Vec::new();
    let mut edges = Vec::new();
    for node in graph.nodes() {
        match node.kind {
            TaskKind::Search => searches_so_far.push(node.id.clone()),
            TaskKind::Compare if graph.dependencies(&node.id).is_empty() => {
                if searches_so_far.is_empty() {
                    warn!(node = %node.id, "compare node has nothing to compare");
                }
                for s in &searches_so_far {
                    edges.push((s.clone(), node.id.clone()));
                }
            }
            _ => {}
        }
    }
    for (dep, dependent) in edges {
        debug!(%dep, %dependent, "inferred compare dependency");
        graph.add_dependency(&dep, &dependent, DependencyType::Inferred)?;
    }
    Ok(())
}

fn infer_generate_dependencies(graph: &mut TaskGraph) -> Result<()> {
    let generators: Vec<NodeId> = graph
        .nodes()
        .filter(|n| n.kind == TaskKind::Generate)
        .map(|n| n.id.clone())
        .collect();
    if generators.is_empty() {
        return Ok(());
    }

    let leaves: Vec<NodeId> = graph
        .nodes()
        .filter(|n| n.kind != TaskKind::Generate)
        .filter(|n| {
            graph
                .dependents(&n.id)
                .iter()
                .all(|d| d.kind == TaskKind::Generate)
        })
        .map(|n| n.id.clone())
        .collect();

    for gen in &generators {
        for leaf in &leaves {
            debug!(dep = %leaf, dependent = %gen, "inferred generate dependency");
            graph.add_dependency(leaf, gen, DependencyType::Inferred)?;
        }
    }
    Ok(())
}

fn into_planning(e: Error) -> Error {
    match e {
        Error::Planning(_) => e,
        other => Error::Planning(other.to_string()),
    }
}
