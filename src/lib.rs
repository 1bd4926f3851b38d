// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Vyuha: an embeddable multi-agent orchestration runtime.
//!
//! The workspace splits into focused crates re-exported here:
//!
//! - [`config`] — typed configuration schema and layered YAML loading.
//! - [`model`] — the message/part data model, the streaming provider trait,
//!   and deterministic mock providers for tests.
//! - [`tools`] — the tool trait and registry/executor, the policy
//!   evaluator, the autonomy gate, and cooperative cancellation.
//! - [`runtime`] — the per-agent turn loop with its event bus, context
//!   manager, agent tree, observer guardians, and learning loop.
//! - [`memory`] — the bi-temporal edge store, the unified recall engine,
//!   procedural memory, and session transcripts.
//! - [`orchestrator`] — the strategy bandit, the task scheduler with its
//!   six dispatch formations and strategy bans, and the DAG engine.

mod recall_tool;

pub use recall_tool::RecallTool;

pub use vyuha_config as config;
pub use vyuha_core as runtime;
pub use vyuha_memory as memory;
pub use vyuha_model as model;
pub use vyuha_orchestrator as orchestrator;
pub use vyuha_tools as tools;

pub use vyuha_config::Config;
pub use vyuha_core::{AgentState, AgentTree, EventBus, TurnLoop};
pub use vyuha_memory::MemoryStore;
pub use vyuha_model::{Message, ModelProvider, Part, Role};
pub use vyuha_orchestrator::{Orchestrator, Strategy};
pub use vyuha_tools::{CancellationToken, PolicyEngine, Tool, ToolRegistry};
