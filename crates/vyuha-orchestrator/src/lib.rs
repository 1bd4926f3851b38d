// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Learning task orchestration.
//!
//! A priority task queue is dispatched onto a pool of agent slots using one
//! of six concurrency formations; a contextual multi-armed bandit (UCB1,
//! Thompson, or LinUCB) learns which formation performs best under the
//! observed conditions, with self-healing bans for persistently failing
//! strategies.  A separate DAG engine executes explicit workflows with
//! per-node timeouts.

mod bandit;
mod dag;
mod error;
mod persist;
mod scheduler;
mod strategy;
mod task;

pub use bandit::{ArmSnapshot, BanditSnapshot, StrategyBandit};
pub use dag::{
    execute_workflow, validate_workflow, NodeExecutor, Workflow, WorkflowNode, WorkflowResult,
};
pub use error::OrchestratorError;
pub use persist::{load_state, save_state, OrchestratorSnapshot};
pub use scheduler::{Orchestrator, StrategyBan, TaskPerformanceRecord, TaskReport};
pub use strategy::{compute_reward, ContextVector, Strategy};
pub use task::{AgentSlot, Priority, SlotExecutor, Task, TaskOutcome, TaskStatus};
