// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Agent hierarchy as an arena of nodes keyed by id.
//!
//! Parent/child fields hold ids only, so lineage walks are index lookups
//! and the parent/child relation always forms a forest rooted at the tree's
//! root agent.  Spawning enforces the depth ceiling; delegation hands a
//! prompt to an injected [`AgentRunner`] and records the child's terminal
//! status; pruning removes terminal subtrees.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use uuid::Uuid;

use vyuha_config::AgentConfig;
use vyuha_model::Message;
use vyuha_tools::cancel::CancellationToken;

use crate::error::CoreError;

pub type AgentId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Running,
    Completed,
    Aborted,
    Error,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Error)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentNode {
    pub id: AgentId,
    pub purpose: String,
    pub depth: usize,
    pub parent: Option<AgentId>,
    /// Children in spawn order.
    pub children: Vec<AgentId>,
    pub status: AgentStatus,
    pub profile_id: String,
    pub created_at: DateTime<Utc>,
}

/// Runs one agent to completion on behalf of the tree.  The production
/// runner drives a turn loop; tests plug in stubs.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        agent: &AgentNode,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<Message, CoreError>;
}

pub struct AgentTree {
    arena: Mutex<HashMap<AgentId, AgentNode>>,
    root_id: AgentId,
    max_depth: usize,
    delegation: Arc<Semaphore>,
    runner: Arc<dyn AgentRunner>,
}

impl AgentTree {
    pub fn new(
        root_purpose: impl Into<String>,
        profile_id: impl Into<String>,
        runner: Arc<dyn AgentRunner>,
        cfg: &AgentConfig,
    ) -> Self {
        let root = AgentNode {
            id: Uuid::new_v4().to_string(),
            purpose: root_purpose.into(),
            depth: 0,
            parent: None,
            children: Vec::new(),
            status: AgentStatus::Idle,
            profile_id: profile_id.into(),
            created_at: Utc::now(),
        };
        let root_id = root.id.clone();
        let mut arena = HashMap::new();
        arena.insert(root_id.clone(), root);
        Self {
            arena: Mutex::new(arena),
            root_id,
            max_depth: cfg.max_agent_depth,
            delegation: Arc::new(Semaphore::new(cfg.delegation_parallelism.max(1))),
            runner,
        }
    }

    pub fn root(&self) -> AgentNode {
        self.arena.lock().unwrap()[&self.root_id].clone()
    }

    pub fn find(&self, id: &str) -> Option<AgentNode> {
        self.arena.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.arena.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a child of `parent_id`.  Fails with `DepthExceeded` when the
    /// child would sit below the configured maximum depth.
    pub fn spawn(
        &self,
        parent_id: &str,
        purpose: impl Into<String>,
        profile_id: impl Into<String>,
    ) -> Result<AgentNode, CoreError> {
        let mut arena = self.arena.lock().unwrap();
        let parent_depth = arena
            .get(parent_id)
            .ok_or_else(|| CoreError::AgentNotFound(parent_id.to_string()))?
            .depth;
        let depth = parent_depth + 1;
        if depth > self.max_depth {
            return Err(CoreError::DepthExceeded {
                depth,
                max: self.max_depth,
            });
        }

        let child = AgentNode {
            id: Uuid::new_v4().to_string(),
            purpose: purpose.into(),
            depth,
            parent: Some(parent_id.to_string()),
            children: Vec::new(),
            status: AgentStatus::Idle,
            profile_id: profile_id.into(),
            created_at: Utc::now(),
        };
        arena
            .get_mut(parent_id)
            .expect("parent checked above")
            .children
            .push(child.id.clone());
        arena.insert(child.id.clone(), child.clone());
        Ok(child)
    }

    pub fn set_status(&self, id: &str, status: AgentStatus) -> Result<(), CoreError> {
        let mut arena = self.arena.lock().unwrap();
        let node = arena
            .get_mut(id)
            .ok_or_else(|| CoreError::AgentNotFound(id.to_string()))?;
        node.status = status;
        Ok(())
    }

    /// Run `child_id` on the injected runner and record its terminal status.
    pub async fn delegate(
        &self,
        child_id: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<Message, CoreError> {
        let child = self
            .find(child_id)
            .ok_or_else(|| CoreError::AgentNotFound(child_id.to_string()))?;
        self.set_status(child_id, AgentStatus::Running)?;

        let result = self.runner.run(&child, prompt, cancel).await;
        let status = match &result {
            Ok(_) => AgentStatus::Completed,
            Err(e) if e.is_cancelled() => AgentStatus::Aborted,
            Err(_) => AgentStatus::Error,
        };
        self.set_status(child_id, status)?;
        result
    }

    /// Delegate to several children concurrently, bounded by the configured
    /// parallelism.  Results are returned in the order of `assignments`
    /// (child spawn order is the conventional input), independent of
    /// completion order.
    pub async fn delegate_parallel(
        self: &Arc<Self>,
        assignments: Vec<(AgentId, String)>,
        cancel: CancellationToken,
    ) -> Vec<Result<Message, CoreError>> {
        let mut handles = Vec::with_capacity(assignments.len());
        for (child_id, prompt) in assignments {
            let tree = Arc::clone(self);
            let permit_pool = Arc::clone(&self.delegation);
            let child_cancel = cancel.child();
            handles.push(tokio::spawn(async move {
                let _permit = permit_pool.acquire_owned().await.expect("semaphore open");
                tree.delegate(&child_id, &prompt, child_cancel).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(r) => r,
                Err(e) => Err(CoreError::Other(anyhow::anyhow!("delegation panicked: {e}"))),
            });
        }
        results
    }

    /// Remove a terminal child and its entire subtree.
    pub fn prune(&self, child_id: &str) -> Result<(), CoreError> {
        let mut arena = self.arena.lock().unwrap();
        let node = arena
            .get(child_id)
            .ok_or_else(|| CoreError::AgentNotFound(child_id.to_string()))?;
        if !node.status.is_terminal() {
            return Err(CoreError::AgentNotTerminal(child_id.to_string()));
        }
        let parent = node.parent.clone();

        let mut stack = vec![child_id.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(node) = arena.remove(&id) {
                stack.extend(node.children);
            }
        }
        if let Some(parent_id) = parent {
            if let Some(p) = arena.get_mut(&parent_id) {
                p.children.retain(|c| c != child_id);
            }
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Path of ancestors from the immediate parent up to the root.
    pub fn ancestors(&self, id: &str) -> Vec<AgentNode> {
        let arena = self.arena.lock().unwrap();
        let mut out = Vec::new();
        let mut current = arena.get(id).and_then(|n| n.parent.clone());
        while let Some(pid) = current {
            if let Some(node) = arena.get(&pid) {
                out.push(node.clone());
                current = node.parent.clone();
            } else {
                break;
            }
        }
        out
    }

    /// All descendants of `id` in depth-first, spawn order.
    pub fn descendants(&self, id: &str) -> Vec<AgentNode> {
        let arena = self.arena.lock().unwrap();
        let mut out = Vec::new();
        let mut stack: Vec<AgentId> = arena
            .get(id)
            .map(|n| n.children.iter().rev().cloned().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if let Some(node) = arena.get(&next) {
                out.push(node.clone());
                stack.extend(node.children.iter().rev().cloned());
            }
        }
        out
    }

    pub fn siblings(&self, id: &str) -> Vec<AgentNode> {
        let arena = self.arena.lock().unwrap();
        let Some(parent_id) = arena.get(id).and_then(|n| n.parent.clone()) else {
            return Vec::new();
        };
        arena[&parent_id]
            .children
            .iter()
            .filter(|c| c.as_str() != id)
            .filter_map(|c| arena.get(c).cloned())
            .collect()
    }

    pub fn is_descendant_of(&self, id: &str, ancestor_id: &str) -> bool {
        self.ancestors(id).iter().any(|n| n.id == ancestor_id)
    }

    /// Ids from the root down to `id`, inclusive.
    pub fn lineage_path(&self, id: &str) -> Vec<AgentId> {
        let mut path: Vec<AgentId> = self.ancestors(id).into_iter().map(|n| n.id).collect();
        path.reverse();
        path.push(id.to_string());
        path
    }

    /// Deterministic ASCII rendering of the tree, children in spawn order.
    pub fn render(&self) -> String {
        let arena = self.arena.lock().unwrap();
        let mut out = String::new();
        let root = &arena[&self.root_id];
        out.push_str(&format!("{} ({})\n", root.purpose, root.status.label()));
        render_children(&arena, &root.children, "", &mut out);
        out
    }
}

fn render_children(
    arena: &HashMap<AgentId, AgentNode>,
    children: &[AgentId],
    prefix: &str,
    out: &mut String,
) {
    for (i, id) in children.iter().enumerate() {
        let Some(node) = arena.get(id) else { continue };
        let last = i == children.len() - 1;
        let branch = if last { "└── " } else { "├── " };
        out.push_str(&format!(
            "{prefix}{branch}{} ({})\n",
            node.purpose,
            node.status.label()
        ));
        let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        render_children(arena, &node.children, &child_prefix, out);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
