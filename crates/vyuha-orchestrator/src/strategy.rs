// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use vyuha_config::RewardWeights;

/// The six dispatch formations the orchestrator can apply to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    LeastLoaded,
    Specialized,
    Hierarchical,
    Swarm,
    Competitive,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::RoundRobin,
        Strategy::LeastLoaded,
        Strategy::Specialized,
        Strategy::Hierarchical,
        Strategy::Swarm,
        Strategy::Competitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastLoaded => "least_loaded",
            Self::Specialized => "specialized",
            Self::Hierarchical => "hierarchical",
            Self::Swarm => "swarm",
            Self::Competitive => "competitive",
        }
    }

    /// Stable arm index into per-strategy state tables.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).expect("listed")
    }
}

/// Observed conditions at selection time, normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContextVector {
    pub complexity: f64,
    pub agent_count_norm: f64,
    pub memory_pressure: f64,
    pub avg_latency_norm: f64,
    pub error_rate: f64,
}

impl ContextVector {
    /// Feature vector with a leading bias term; the `d = 6` context used by
    /// LinUCB.
    pub fn features(&self) -> [f64; 6] {
        [
            1.0,
            self.complexity,
            self.agent_count_norm,
            self.memory_pressure,
            self.avg_latency_norm,
            self.error_rate,
        ]
    }
}

/// Blend success, speed margin, and cost margin into a `[0, 1]` reward.
///
/// `reward = w_s·success + w_t·max(0, 1 − duration/expected)
///         + w_c·max(0, 1 − cost/budget)`, clamped.
pub fn compute_reward(
    weights: &RewardWeights,
    success: bool,
    duration_ms: u64,
    expected_duration_ms: Option<u64>,
    cost: f64,
    budget_cost: Option<f64>,
) -> f64 {
    let success_term = if success { 1.0 } else { 0.0 };
    let speed_term = match expected_duration_ms {
        Some(expected) if expected > 0 => {
            (1.0 - duration_ms as f64 / expected as f64).max(0.0)
        }
        _ => 0.0,
    };
    let cost_term = match budget_cost {
        Some(budget) if budget > 0.0 => (1.0 - cost / budget).max(0.0),
        _ => 0.0,
    };
    let reward =
        weights.success * success_term + weights.speed * speed_term + weights.cost * cost_term;
    reward.clamp(0.0, 1.0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_strategies_have_stable_indices() {
        for (i, s) in Strategy::ALL.iter().enumerate() {
            assert_eq!(s.index(), i);
        }
    }

    #[test]
    fn strategy_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Strategy::LeastLoaded).unwrap(),
            "\"least_loaded\""
        );
    }

    #[test]
    fn features_start_with_bias_term() {
        let ctx = ContextVector {
            complexity: 0.4,
            ..Default::default()
        };
        let f = ctx.features();
        assert_eq!(f[0], 1.0);
        assert_eq!(f[1], 0.4);
        assert_eq!(f.len(), 6);
    }

    // ── Reward ────────────────────────────────────────────────────────────────

    #[test]
    fn documented_reward_example() {
        // success, 10s of expected 20s, $0.05 of $0.10 with default weights:
        // 0.5·1 + 0.3·0.5 + 0.2·0.5 = 0.75
        let r = compute_reward(
            &RewardWeights::default(),
            true,
            10_000,
            Some(20_000),
            0.05,
            Some(0.10),
        );
        assert!((r - 0.75).abs() < 1e-9);
    }

    #[test]
    fn overruns_floor_at_zero_margin() {
        let r = compute_reward(
            &RewardWeights::default(),
            true,
            40_000,
            Some(20_000),
            0.30,
            Some(0.10),
        );
        // Both margins are negative → only the success term remains.
        assert!((r - 0.5).abs() < 1e-9);
    }

    #[test]
    fn reward_is_clamped_to_unit_interval() {
        let generous = RewardWeights {
            success: 2.0,
            speed: 2.0,
            cost: 2.0,
        };
        let high = compute_reward(&generous, true, 0, Some(1_000), 0.0, Some(1.0));
        assert_eq!(high, 1.0);

        let negative = RewardWeights {
            success: -1.0,
            speed: 0.0,
            cost: 0.0,
        };
        let low = compute_reward(&negative, true, 0, None, 0.0, None);
        assert_eq!(low, 0.0);
    }

    #[test]
    fn missing_expectations_zero_their_terms() {
        let r = compute_reward(&RewardWeights::default(), true, 5_000, None, 0.5, None);
        assert!((r - 0.5).abs() < 1e-9);
    }

    #[test]
    fn failure_drops_success_term() {
        let r = compute_reward(
            &RewardWeights::default(),
            false,
            10_000,
            Some(20_000),
            0.05,
            Some(0.10),
        );
        assert!((r - 0.25).abs() < 1e-9);
    }
}
