// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use vyuha_model::Role;

/// A tool call as shown to observers.
#[derive(Debug, Clone)]
pub struct ToolCallView {
    pub name: String,
    pub args_json: String,
}

/// A tool result as shown to observers.
#[derive(Debug, Clone)]
pub struct ToolResultView {
    pub name: String,
    pub is_error: bool,
}

/// What observers see of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnObservation {
    pub turn: u32,
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCallView>,
    pub tool_results: Vec<ToolResultView>,
}

/// One finished tool execution, with its latency.
#[derive(Debug, Clone)]
pub struct ToolObservation {
    pub name: String,
    pub duration_ms: u64,
    pub success: bool,
}

/// Passive consumer fed by the turn loop.  Observers must not mutate agent
/// state; they append to their own buffers only.
pub trait TurnObserver: Send + Sync {
    fn on_turn(&self, observation: &TurnObservation);
    fn on_tool(&self, _observation: &ToolObservation) {}
}
