// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vyuha_tools::cancel::CancellationToken;

/// Queue priority; lower discriminants dispatch first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: String,
    pub description: String,
    pub priority: Priority,
    /// Task ids that must complete successfully before this task is ready.
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub max_retries: u32,
    pub status: TaskStatus,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Duration expectation feeding the speed term of the reward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_duration_ms: Option<u64>,
    /// Cost budget feeding the cost term of the reward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_cost: Option<f64>,
}

impl Task {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            description: description.into(),
            priority: Priority::Normal,
            dependencies: Vec::new(),
            deadline: None,
            max_retries: 0,
            status: TaskStatus::Pending,
            metadata: serde_json::Value::Null,
            expected_duration_ms: None,
            budget_cost: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_expectations(
        mut self,
        expected_duration_ms: Option<u64>,
        budget_cost: Option<f64>,
    ) -> Self {
        self.expected_duration_ms = expected_duration_ms;
        self.budget_cost = budget_cost;
        self
    }
}

/// A dispatch target: an agent-plus-executor pair the orchestrator can
/// assign work to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSlot {
    pub id: String,
    pub capabilities: Vec<String>,
    pub busy: bool,
    pub running_task_count: usize,
    pub queued_task_count: usize,
}

impl AgentSlot {
    pub fn new(id: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            id: id.into(),
            capabilities,
            busy: false,
            running_task_count: 0,
            queued_task_count: 0,
        }
    }
}

/// What one slot produced for one task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub success: bool,
    pub output: String,
    pub duration_ms: u64,
    pub cost: f64,
}

impl TaskOutcome {
    pub fn failure(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: message.into(),
            duration_ms,
            cost: 0.0,
        }
    }
}

/// Executes a task on one slot.  Implementations typically wrap a turn loop
/// bound to the slot's agent; tests use stubs.
#[async_trait]
pub trait SlotExecutor: Send + Sync {
    async fn run(
        &self,
        slot: &AgentSlot,
        task: &Task,
        cancel: CancellationToken,
    ) -> TaskOutcome;

    /// Shared scratchpad note hook for swarm work; default is a no-op.
    async fn share_note(&self, _slot: &AgentSlot, _note: &str) {}
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_critical_first() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert!(Priority::Low < Priority::Background);
    }

    #[test]
    fn new_task_is_pending_normal_priority() {
        let t = Task::new("build", "compile the project");
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.priority, Priority::Normal);
        assert!(t.dependencies.is_empty());
    }

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(Task::new("a", "x").id, Task::new("a", "x").id);
    }

    #[test]
    fn task_round_trips_through_json() {
        let t = Task::new("test", "run the suite")
            .with_priority(Priority::High)
            .with_expectations(Some(20_000), Some(0.10));
        let json = serde_json::to_string(&t).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, t.id);
        assert_eq!(back.priority, Priority::High);
        assert_eq!(back.expected_duration_ms, Some(20_000));
    }

    #[test]
    fn new_slot_is_idle() {
        let s = AgentSlot::new("slot-0", vec!["coding".into()]);
        assert!(!s.busy);
        assert_eq!(s.running_task_count, 0);
    }
}
