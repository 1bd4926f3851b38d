// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use uuid::Uuid;

use vyuha_config::ThinkingLevel;
use vyuha_model::{Message, ToolSchema};

/// The mutable state of one agent.
///
/// Mutated only by the owning turn loop; everyone else sees snapshots.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub provider_id: String,
    pub tools: Vec<ToolSchema>,
    pub system_prompt: String,
    pub thinking: ThinkingLevel,
    pub is_streaming: bool,
    /// Approximate total token count for the current message list
    token_count: usize,
}

impl AgentState {
    pub fn new(
        provider_id: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            model: model.into(),
            provider_id: provider_id.into(),
            tools: Vec::new(),
            system_prompt: system_prompt.into(),
            thinking: ThinkingLevel::None,
            is_streaming: false,
            token_count: 0,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_thinking(mut self, thinking: ThinkingLevel) -> Self {
        self.thinking = thinking;
        self
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Fraction of the given token budget consumed (0.0–1.0+).
    pub fn budget_fraction(&self, budget: usize) -> f32 {
        if budget == 0 {
            return 0.0;
        }
        (self.token_count as f32) / (budget as f32)
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Read-only copy for external observers.
    pub fn snapshot(&self) -> AgentState {
        self.clone()
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == vyuha_model::Role::Assistant)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
