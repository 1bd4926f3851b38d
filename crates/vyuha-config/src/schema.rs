// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub guardians: GuardianConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_max_turns() -> u32 {
    25
}
fn default_max_agent_depth() -> usize {
    5
}
fn default_token_budget() -> usize {
    128_000
}
fn default_delegation_parallelism() -> usize {
    4
}
fn default_true() -> bool {
    true
}

/// Depth of model reasoning requested per completion.
///
/// Providers that do not support extended thinking ignore this; the turn loop
/// forwards it as a budget hint only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    /// Thinking token budget forwarded to providers that support it.
    pub fn budget_tokens(&self) -> Option<u32> {
        match self {
            ThinkingLevel::None => None,
            ThinkingLevel::Low => Some(1_024),
            ThinkingLevel::Medium => Some(8_192),
            ThinkingLevel::High => Some(32_768),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum stream→tools iterations before the loop appends a synthetic
    /// wrap-up message and returns.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Spawning a child past this depth fails (root is depth 0).
    #[serde(default = "default_max_agent_depth")]
    pub max_agent_depth: usize,
    /// Context-window budget in tokens; the tiered compaction thresholds are
    /// fractions of this value.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Upper bound on concurrently delegated children in
    /// `delegate_parallel`.
    #[serde(default = "default_delegation_parallelism")]
    pub delegation_parallelism: usize,
    /// Record a per-turn heartbeat readable by observers.
    #[serde(default = "default_true")]
    pub heartbeat: bool,
    #[serde(default)]
    pub thinking: ThinkingLevel,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_agent_depth: default_max_agent_depth(),
            token_budget: default_token_budget(),
            delegation_parallelism: default_delegation_parallelism(),
            heartbeat: true,
            thinking: ThinkingLevel::None,
        }
    }
}

/// Arm-selection algorithm used by the strategy bandit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanditMode {
    Ucb1,
    #[default]
    Thompson,
    Linucb,
}

/// Relative weights of the three reward components.  They are applied to
/// success, speed, and cost margins respectively and the result is clamped
/// to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub success: f64,
    pub speed: f64,
    pub cost: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            success: 0.5,
            speed: 0.3,
            cost: 0.2,
        }
    }
}

fn default_ban_failure_threshold() -> f64 {
    0.5
}
fn default_ban_min_tasks() -> u32 {
    10
}
fn default_ban_duration_ms() -> i64 {
    300_000
}
fn default_autosave_interval() -> u32 {
    10
}
fn default_competitive_fanout() -> usize {
    2
}
fn default_hierarchical_max_depth() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub bandit_mode: BanditMode,
    /// Seed for the bandit's sampler.  Fixed default so Thompson selection is
    /// reproducible; override for production variety.
    #[serde(default)]
    pub bandit_seed: u64,
    #[serde(default)]
    pub reward_weights: RewardWeights,
    /// A strategy whose failure rate exceeds this after `ban_min_tasks`
    /// trials is banned.
    #[serde(default = "default_ban_failure_threshold")]
    pub ban_failure_threshold: f64,
    #[serde(default = "default_ban_min_tasks")]
    pub ban_min_tasks: u32,
    #[serde(default = "default_ban_duration_ms")]
    pub ban_duration_ms: i64,
    /// Outcomes recorded between atomic state snapshots.
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval: u32,
    /// Number of slots raced by the competitive formation.
    #[serde(default = "default_competitive_fanout")]
    pub competitive_fanout: usize,
    /// Recursion ceiling for hierarchical task decomposition.
    #[serde(default = "default_hierarchical_max_depth")]
    pub hierarchical_max_depth: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bandit_mode: BanditMode::default(),
            bandit_seed: 0,
            reward_weights: RewardWeights::default(),
            ban_failure_threshold: default_ban_failure_threshold(),
            ban_min_tasks: default_ban_min_tasks(),
            ban_duration_ms: default_ban_duration_ms(),
            autosave_interval: default_autosave_interval(),
            competitive_fanout: default_competitive_fanout(),
            hierarchical_max_depth: default_hierarchical_max_depth(),
        }
    }
}

fn default_retention_window_ms() -> i64 {
    7 * 24 * 60 * 60 * 1000
}
fn default_recall_top_k() -> usize {
    10
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_half_life_ms() -> i64 {
    24 * 60 * 60 * 1000
}
fn default_min_sessions() -> usize {
    3
}
fn default_min_success_rate() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Superseded edges older than this are dropped by `compact`.
    #[serde(default = "default_retention_window_ms")]
    pub retention_window_ms: i64,
    #[serde(default = "default_recall_top_k")]
    pub recall_top_k: usize,
    /// The `k` constant in reciprocal-rank fusion.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Half-life for temporal decay of edge weights and recency scoring.
    #[serde(default = "default_half_life_ms")]
    pub half_life_ms: i64,
    /// A tool n-gram seen in fewer sessions than this never becomes a
    /// procedure.
    #[serde(default = "default_min_sessions")]
    pub min_sessions: usize,
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retention_window_ms: default_retention_window_ms(),
            recall_top_k: default_recall_top_k(),
            rrf_k: default_rrf_k(),
            half_life_ms: default_half_life_ms(),
            min_sessions: default_min_sessions(),
            min_success_rate: default_min_success_rate(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.6
}
fn default_ring_capacity() -> usize {
    64
}
fn default_stall_window_turns() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    /// Findings with lower confidence are dropped at observation time.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Bounded finding ring per guardian; the oldest entry is evicted when
    /// full.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Turns a started task may run without a completion signal before the
    /// correctness guardian flags a stall.
    #[serde(default = "default_stall_window_turns")]
    pub stall_window_turns: u32,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            ring_capacity: default_ring_capacity(),
            stall_window_turns: default_stall_window_turns(),
        }
    }
}

fn default_disable_after_failures() -> u32 {
    3
}
fn default_disable_duration_ms() -> i64 {
    60_000
}
fn default_shell_timeout_secs() -> u64 {
    120
}
fn default_deny_patterns() -> Vec<String> {
    vec![
        "rm -rf /*".into(),
        "rm -rf /".into(),
        "mkfs*".into(),
        "dd if=*of=/dev/*".into(),
        ":(){*".into(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Consecutive failures after which the autonomy gate disables a tool.
    #[serde(default = "default_disable_after_failures")]
    pub disable_after_failures: u32,
    /// How long a disabled tool stays disabled.
    #[serde(default = "default_disable_duration_ms")]
    pub disable_duration_ms: i64,
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
    /// Shell glob patterns for commands the policy evaluator always denies.
    #[serde(default = "default_deny_patterns")]
    pub deny_patterns: Vec<String>,
    /// Hosts exempt from the network-request warning rule.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            disable_after_failures: default_disable_after_failures(),
            disable_duration_ms: default_disable_duration_ms(),
            shell_timeout_secs: default_shell_timeout_secs(),
            deny_patterns: default_deny_patterns(),
            allowed_hosts: Vec::new(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
