// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Learning loop: per-tool performance tracking and next-tool prediction.
//!
//! A first-order Markov transition matrix over tool names feeds next-tool
//! prediction; per-tool counters feed a blended performance score.  The
//! whole state serializes to a round-trippable snapshot.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::observer::{ToolObservation, TurnObservation, TurnObserver};

/// Latency scale for the speed component of the performance score.
const TAU_MS: f64 = 2_000.0;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStats {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_latency_ms: u64,
    pub feedback_turns: u64,
    pub accepted_turns: u64,
}

impl ToolStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_calls as f64
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.total_calls as f64
    }

    fn user_satisfaction(&self) -> f64 {
        if self.feedback_turns == 0 {
            return 0.5;
        }
        self.accepted_turns as f64 / self.feedback_turns.max(1) as f64
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSnapshot {
    pub tools: BTreeMap<String, ToolStats>,
    pub transitions: BTreeMap<String, BTreeMap<String, u64>>,
    pub version: u32,
}

#[derive(Default)]
struct LearningState {
    tools: BTreeMap<String, ToolStats>,
    transitions: BTreeMap<String, BTreeMap<String, u64>>,
    last_tool: Option<String>,
}

#[derive(Default)]
pub struct LearningLoop {
    state: Mutex<LearningState>,
}

impl LearningLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record user feedback on a turn that used `tool`.
    pub fn record_feedback(&self, tool: &str, accepted: bool) {
        let mut state = self.state.lock().unwrap();
        let stats = state.tools.entry(tool.to_string()).or_default();
        stats.feedback_turns += 1;
        if accepted {
            stats.accepted_turns += 1;
        }
    }

    /// Most likely next tool after `tool`, from observed transitions.
    /// Ties resolve to the lexicographically smaller name.
    pub fn predict_next(&self, tool: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let followers = state.transitions.get(tool)?;
        followers
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, _)| name.clone())
    }

    /// Blended score: `0.5·success_rate + 0.3·speed + 0.2·satisfaction`
    /// with `speed = exp(−avg_latency/τ)` and satisfaction defaulting to
    /// 0.5 when no feedback exists.
    pub fn performance_score(&self, tool: &str) -> f64 {
        let state = self.state.lock().unwrap();
        let Some(stats) = state.tools.get(tool) else {
            return 0.0;
        };
        let speed = (-stats.avg_latency_ms() / TAU_MS).exp();
        0.5 * stats.success_rate() + 0.3 * speed + 0.2 * stats.user_satisfaction()
    }

    pub fn stats(&self, tool: &str) -> Option<ToolStats> {
        self.state.lock().unwrap().tools.get(tool).cloned()
    }

    pub fn snapshot(&self) -> LearningSnapshot {
        let state = self.state.lock().unwrap();
        LearningSnapshot {
            tools: state.tools.clone(),
            transitions: state.transitions.clone(),
            version: 1,
        }
    }

    pub fn restore(snapshot: LearningSnapshot) -> Self {
        Self {
            state: Mutex::new(LearningState {
                tools: snapshot.tools,
                transitions: snapshot.transitions,
                last_tool: None,
            }),
        }
    }
}

impl TurnObserver for LearningLoop {
    fn on_turn(&self, _observation: &TurnObservation) {}

    fn on_tool(&self, obs: &ToolObservation) {
        let mut state = self.state.lock().unwrap();
        let stats = state.tools.entry(obs.name.clone()).or_default();
        stats.total_calls += 1;
        stats.total_latency_ms += obs.duration_ms;
        if obs.success {
            stats.success_count += 1;
        } else {
            stats.failure_count += 1;
        }

        if let Some(prev) = state.last_tool.take() {
            *state
                .transitions
                .entry(prev)
                .or_default()
                .entry(obs.name.clone())
                .or_default() += 1;
        }
        state.last_tool = Some(obs.name.clone());
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
