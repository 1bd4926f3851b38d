// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Explicit workflow execution over a validated DAG.
//!
//! Validation rejects empty workflows, duplicate or unknown ids,
//! self-edges, and cycles (three-colour depth-first search).  Execution
//! groups nodes into topological levels (Kahn's algorithm); nodes within a
//! level run concurrently, each raced against its own timeout, and a node
//! whose dependencies did not all succeed is skipped with an error naming
//! them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::debug;

use crate::error::OrchestratorError;

#[derive(Debug, Clone)]
pub struct WorkflowNode {
    pub id: String,
    pub label: String,
    pub dependencies: Vec<String>,
    pub timeout_ms: Option<u64>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>, dependencies: Vec<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            dependencies,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub nodes: Vec<WorkflowNode>,
}

/// Executes one node; the returned value lands in the workflow outputs.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node: &WorkflowNode) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub success: bool,
    pub outputs: HashMap<String, Value>,
    pub errors: HashMap<String, String>,
    pub duration_ms: u64,
}

/// Structural validation; execution refuses to start on any failure here.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), OrchestratorError> {
    if workflow.nodes.is_empty() {
        return Err(OrchestratorError::DagValidation(
            "workflow has no nodes".into(),
        ));
    }

    let mut ids = HashSet::new();
    for node in &workflow.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(OrchestratorError::DagValidation(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
    }
    for node in &workflow.nodes {
        for dep in &node.dependencies {
            if dep == &node.id {
                return Err(OrchestratorError::DagValidation(format!(
                    "node '{}' depends on itself",
                    node.id
                )));
            }
            if !ids.contains(dep.as_str()) {
                return Err(OrchestratorError::DagValidation(format!(
                    "node '{}' depends on unknown node '{dep}'",
                    node.id
                )));
            }
        }
    }

    // Cycle detection: three-colour DFS over the dependency edges.
    #[derive(Clone, Copy, PartialEq)]
    enum Colour {
        White,
        Grey,
        Black,
    }
    let index: HashMap<&str, &WorkflowNode> =
        workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut colour: HashMap<&str, Colour> = workflow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), Colour::White))
        .collect();

    fn visit<'a>(
        id: &'a str,
        index: &HashMap<&'a str, &'a WorkflowNode>,
        colour: &mut HashMap<&'a str, Colour>,
    ) -> Result<(), OrchestratorError> {
        colour.insert(id, Colour::Grey);
        for dep in &index[id].dependencies {
            match colour[dep.as_str()] {
                Colour::Grey => {
                    return Err(OrchestratorError::DagValidation(format!(
                        "cycle detected through node '{dep}'"
                    )));
                }
                Colour::White => visit(dep.as_str(), index, colour)?,
                Colour::Black => {}
            }
        }
        colour.insert(id, Colour::Black);
        Ok(())
    }

    for node in &workflow.nodes {
        if colour[node.id.as_str()] == Colour::White {
            visit(node.id.as_str(), &index, &mut colour)?;
        }
    }
    Ok(())
}

/// Group node ids into topological levels (Kahn's algorithm).  Every node
/// appears in a strictly later level than all of its dependencies.
fn topological_levels(workflow: &Workflow) -> Vec<Vec<String>> {
    let mut remaining: HashMap<&str, HashSet<&str>> = workflow
        .nodes
        .iter()
        .map(|n| {
            (
                n.id.as_str(),
                n.dependencies.iter().map(|d| d.as_str()).collect(),
            )
        })
        .collect();

    let mut levels = Vec::new();
    while !remaining.is_empty() {
        let mut level: Vec<String> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| id.to_string())
            .collect();
        if level.is_empty() {
            // Unreachable after validation; avoids spinning on a cycle.
            break;
        }
        level.sort();
        for id in &level {
            remaining.remove(id.as_str());
        }
        for deps in remaining.values_mut() {
            for id in &level {
                deps.remove(id.as_str());
            }
        }
        levels.push(level);
    }
    levels
}

/// Validate and execute the workflow.
pub async fn execute_workflow(
    workflow: &Workflow,
    executor: Arc<dyn NodeExecutor>,
) -> Result<WorkflowResult, OrchestratorError> {
    validate_workflow(workflow)?;
    let started = Instant::now();

    let index: HashMap<&str, &WorkflowNode> =
        workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut outputs: HashMap<String, Value> = HashMap::new();
    let mut errors: HashMap<String, String> = HashMap::new();

    for level in topological_levels(workflow) {
        // Partition the level into runnable nodes and nodes whose
        // dependencies already failed or were skipped.
        let mut runnable: Vec<&WorkflowNode> = Vec::new();
        for id in &level {
            let node = index[id.as_str()];
            let failed_deps: Vec<&str> = node
                .dependencies
                .iter()
                .filter(|d| !outputs.contains_key(*d))
                .map(|d| d.as_str())
                .collect();
            if failed_deps.is_empty() {
                runnable.push(node);
            } else {
                errors.insert(
                    node.id.clone(),
                    format!("dependencies failed or missing: {}", failed_deps.join(", ")),
                );
            }
        }

        let results = join_all(runnable.iter().map(|node| {
            let executor = Arc::clone(&executor);
            async move {
                debug!(node = %node.id, "executing workflow node");
                let run = executor.execute(node);
                let outcome = match node.timeout_ms {
                    Some(ms) => {
                        match tokio::time::timeout(Duration::from_millis(ms), run).await {
                            Ok(r) => r,
                            Err(_) => Err(anyhow::anyhow!("timed out after {ms}ms")),
                        }
                    }
                    None => run.await,
                };
                (node.id.clone(), outcome)
            }
        }))
        .await;

        for (id, outcome) in results {
            match outcome {
                Ok(value) => {
                    outputs.insert(id, value);
                }
                Err(e) => {
                    errors.insert(id, e.to_string());
                }
            }
        }
    }

    Ok(WorkflowResult {
        success: errors.is_empty(),
        outputs,
        errors,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn node(id: &str, deps: &[&str]) -> WorkflowNode {
        WorkflowNode::new(id, id, deps.iter().map(|d| d.to_string()).collect())
    }

    fn workflow(nodes: Vec<WorkflowNode>) -> Workflow {
        Workflow {
            id: "wf".into(),
            name: "test workflow".into(),
            nodes,
        }
    }

    /// Succeeds for every node except the ones named in `failing`; records
    /// start order.
    struct ScriptedNodes {
        failing: Vec<String>,
        started: Mutex<Vec<String>>,
    }

    impl ScriptedNodes {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                started: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NodeExecutor for ScriptedNodes {
        async fn execute(&self, node: &WorkflowNode) -> anyhow::Result<Value> {
            self.started.lock().unwrap().push(node.id.clone());
            if self.failing.contains(&node.id) {
                anyhow::bail!("{} exploded", node.id);
            }
            Ok(json!({ "node": node.id }))
        }
    }

    struct SlowNode;

    #[async_trait]
    impl NodeExecutor for SlowNode {
        async fn execute(&self, _node: &WorkflowNode) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("late"))
        }
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn empty_workflow_is_invalid() {
        let err = validate_workflow(&workflow(vec![])).unwrap_err();
        assert!(err.to_string().contains("no nodes"));
    }

    #[test]
    fn duplicate_ids_are_invalid() {
        let err =
            validate_workflow(&workflow(vec![node("a", &[]), node("a", &[])])).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_dependency_is_invalid() {
        let err = validate_workflow(&workflow(vec![node("a", &["ghost"])])).unwrap_err();
        assert!(err.to_string().contains("unknown node"));
    }

    #[test]
    fn self_edge_is_invalid() {
        let err = validate_workflow(&workflow(vec![node("a", &["a"])])).unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[test]
    fn cycle_is_invalid() {
        let err = validate_workflow(&workflow(vec![
            node("a", &["c"]),
            node("b", &["a"]),
            node("c", &["b"]),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn valid_diamond_passes() {
        assert!(validate_workflow(&workflow(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &["b", "c"]),
        ]))
        .is_ok());
    }

    // ── Levels ────────────────────────────────────────────────────────────────

    #[test]
    fn levels_respect_topological_order() {
        let wf = workflow(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &["b", "c"]),
        ]);
        let levels = topological_levels(&wf);
        assert_eq!(levels, vec![
            vec!["a".to_string()],
            vec!["b".to_string(), "c".to_string()],
            vec!["d".to_string()],
        ]);
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn executes_all_nodes_in_dependency_order() {
        let exec = Arc::new(ScriptedNodes::new(&[]));
        let wf = workflow(vec![
            node("lint", &[]),
            node("test", &["lint"]),
            node("deploy", &["test"]),
        ]);
        let result = execute_workflow(&wf, Arc::clone(&exec) as Arc<dyn NodeExecutor>)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.outputs.len(), 3);
        assert_eq!(
            *exec.started.lock().unwrap(),
            vec!["lint", "test", "deploy"]
        );
    }

    #[tokio::test]
    async fn failure_skips_dependents_with_named_reason() {
        let exec = Arc::new(ScriptedNodes::new(&["test"]));
        let wf = workflow(vec![
            node("lint", &[]),
            node("test", &["lint"]),
            node("deploy", &["test"]),
        ]);
        let result = execute_workflow(&wf, Arc::clone(&exec) as Arc<dyn NodeExecutor>)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.outputs.contains_key("lint"));
        assert!(result.errors["test"].contains("exploded"));
        assert!(
            result.errors["deploy"].contains("dependencies failed or missing: test"),
            "{}",
            result.errors["deploy"]
        );
        // deploy never started.
        assert_eq!(*exec.started.lock().unwrap(), vec!["lint", "test"]);
    }

    #[tokio::test]
    async fn independent_branch_survives_sibling_failure() {
        let exec = Arc::new(ScriptedNodes::new(&["b"]));
        let wf = workflow(vec![
            node("a", &[]),
            node("b", &[]),
            node("c", &["a"]),
        ]);
        let result = execute_workflow(&wf, Arc::clone(&exec) as Arc<dyn NodeExecutor>)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.outputs.contains_key("c"));
    }

    #[tokio::test]
    async fn node_timeout_is_recorded_as_error() {
        let wf = workflow(vec![WorkflowNode::new("slow", "slow", vec![]).with_timeout_ms(20)]);
        let result = execute_workflow(&wf, Arc::new(SlowNode)).await.unwrap();
        assert!(!result.success);
        assert!(result.errors["slow"].contains("timed out"));
    }

    #[tokio::test]
    async fn invalid_workflow_never_executes() {
        let exec = Arc::new(ScriptedNodes::new(&[]));
        let wf = workflow(vec![node("a", &["a"])]);
        assert!(execute_workflow(&wf, Arc::clone(&exec) as Arc<dyn NodeExecutor>)
            .await
            .is_err());
        assert!(exec.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn level_nodes_start_after_dependencies_complete() {
        // The ordering assertion of executes_all_nodes_in_dependency_order
        // covers chains; here the diamond: d starts after both b and c.
        let exec = Arc::new(ScriptedNodes::new(&[]));
        let wf = workflow(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &["b", "c"]),
        ]);
        let result = execute_workflow(&wf, Arc::clone(&exec) as Arc<dyn NodeExecutor>)
            .await
            .unwrap();
        assert!(result.success);
        let started = exec.started.lock().unwrap();
        let pos = |id: &str| started.iter().position(|s| s == id).unwrap();
        assert!(pos("d") > pos("b"));
        assert!(pos("d") > pos("c"));
        assert!(pos("b") > pos("a"));
    }
}
