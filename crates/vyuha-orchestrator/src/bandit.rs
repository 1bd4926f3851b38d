// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Contextual multi-armed bandit over the six dispatch strategies.
//!
//! Three selectable modes: UCB1 (untried arms first, then mean plus a
//! `√(2·ln N / n)` exploration bonus), Thompson sampling over per-arm Beta
//! posteriors, and LinUCB with a 6-dimensional context, per-arm design
//! matrix `A` and reward vector `b`, solved by Cholesky factorization.
//! Selection and update run under one lock so `(A, b)` are never read torn.
//! UCB1 and LinUCB are deterministic given identical state and context;
//! Thompson is deterministic given the seed.

use std::collections::HashSet;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vyuha_config::BanditMode;

use crate::strategy::{ContextVector, Strategy};

const D: usize = 6;
const LINUCB_ALPHA: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Arm {
    plays: u64,
    cumulative_reward: f64,
    alpha: f64,
    beta: f64,
    /// LinUCB design matrix, `I` at start.
    a: [[f64; D]; D],
    /// LinUCB reward vector.
    b: [f64; D],
}

impl Default for Arm {
    fn default() -> Self {
        Self {
            plays: 0,
            cumulative_reward: 0.0,
            alpha: 1.0,
            beta: 1.0,
            a: identity(),
            b: [0.0; D],
        }
    }
}

impl Arm {
    fn mean(&self) -> f64 {
        if self.plays == 0 {
            0.0
        } else {
            self.cumulative_reward / self.plays as f64
        }
    }
}

/// Round-trippable bandit state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditSnapshot {
    pub mode: BanditMode,
    pub seed: u64,
    pub per_arm: Vec<ArmSnapshot>,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSnapshot {
    pub strategy: Strategy,
    pub plays: u64,
    pub cumulative_reward: f64,
    pub alpha: f64,
    pub beta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<Vec<f64>>,
}

struct BanditState {
    arms: [Arm; 6],
    rng: StdRng,
}

pub struct StrategyBandit {
    mode: BanditMode,
    seed: u64,
    state: Mutex<BanditState>,
}

impl StrategyBandit {
    pub fn new(mode: BanditMode, seed: u64) -> Self {
        Self {
            mode,
            seed,
            state: Mutex::new(BanditState {
                arms: Default::default(),
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    pub fn mode(&self) -> BanditMode {
        self.mode
    }

    /// Pick the best non-banned strategy for the observed context.
    /// Returns `None` when every strategy is banned.
    pub fn select(&self, ctx: &ContextVector, banned: &HashSet<Strategy>) -> Option<Strategy> {
        let candidates: Vec<Strategy> = Strategy::ALL
            .iter()
            .filter(|s| !banned.contains(s))
            .copied()
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let mut state = self.state.lock().unwrap();

        // Untried arms are explored first, in declaration order.
        if matches!(self.mode, BanditMode::Ucb1) {
            if let Some(&fresh) = candidates
                .iter()
                .find(|s| state.arms[s.index()].plays == 0)
            {
                return Some(fresh);
            }
        }

        let scored: Vec<(Strategy, f64)> = match self.mode {
            BanditMode::Ucb1 => {
                let total: u64 = state.arms.iter().map(|a| a.plays).sum();
                candidates
                    .iter()
                    .map(|&s| {
                        let arm = &state.arms[s.index()];
                        let bonus = (2.0 * (total as f64).ln() / arm.plays as f64).sqrt();
                        (s, arm.mean() + bonus)
                    })
                    .collect()
            }
            BanditMode::Thompson => candidates
                .iter()
                .map(|&s| {
                    let arm = &state.arms[s.index()];
                    let dist = Beta::new(arm.alpha, arm.beta).expect("positive parameters");
                    let sample = dist.sample(&mut state.rng);
                    (s, sample)
                })
                .collect(),
            BanditMode::Linucb => {
                let x = ctx.features();
                candidates
                    .iter()
                    .map(|&s| {
                        let arm = &state.arms[s.index()];
                        let chol = cholesky(&arm.a);
                        let theta = solve(&chol, &arm.b);
                        let z = solve(&chol, &x);
                        let mean: f64 = theta.iter().zip(&x).map(|(t, xi)| t * xi).sum();
                        let var: f64 = x.iter().zip(&z).map(|(xi, zi)| xi * zi).sum();
                        (s, mean + LINUCB_ALPHA * var.max(0.0).sqrt())
                    })
                    .collect()
            }
        };

        // Highest score wins; ties go to the arm with fewer plays, then to
        // declaration order (the iteration order of `scored`).
        let pick = scored
            .iter()
            .copied()
            .max_by(|(sa, a), (sb, b)| {
                a.partial_cmp(b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        state.arms[sb.index()]
                            .plays
                            .cmp(&state.arms[sa.index()].plays)
                    })
            })
            .map(|(s, _)| s);
        debug!(mode = ?self.mode, choice = ?pick, "bandit selection");
        pick
    }

    /// Record the observed reward for one play of `strategy`.
    pub fn update(&self, strategy: Strategy, reward: f64, ctx: &ContextVector) {
        let reward = reward.clamp(0.0, 1.0);
        let mut state = self.state.lock().unwrap();
        let arm = &mut state.arms[strategy.index()];
        arm.plays += 1;
        arm.cumulative_reward += reward;
        arm.alpha += reward;
        arm.beta += 1.0 - reward;

        let x = ctx.features();
        for i in 0..D {
            for j in 0..D {
                arm.a[i][j] += x[i] * x[j];
            }
            arm.b[i] += reward * x[i];
        }
    }

    pub fn plays(&self, strategy: Strategy) -> u64 {
        self.state.lock().unwrap().arms[strategy.index()].plays
    }

    pub fn snapshot(&self) -> BanditSnapshot {
        let state = self.state.lock().unwrap();
        let include_linear = matches!(self.mode, BanditMode::Linucb);
        BanditSnapshot {
            mode: self.mode,
            seed: self.seed,
            per_arm: Strategy::ALL
                .iter()
                .map(|&s| {
                    let arm = &state.arms[s.index()];
                    ArmSnapshot {
                        strategy: s,
                        plays: arm.plays,
                        cumulative_reward: arm.cumulative_reward,
                        alpha: arm.alpha,
                        beta: arm.beta,
                        a: include_linear
                            .then(|| arm.a.iter().map(|row| row.to_vec()).collect()),
                        b: include_linear.then(|| arm.b.to_vec()),
                    }
                })
                .collect(),
            version: 1,
        }
    }

    pub fn restore(snapshot: &BanditSnapshot) -> Self {
        let bandit = Self::new(snapshot.mode, snapshot.seed);
        {
            let mut state = bandit.state.lock().unwrap();
            for arm_snap in &snapshot.per_arm {
                let arm = &mut state.arms[arm_snap.strategy.index()];
                arm.plays = arm_snap.plays;
                arm.cumulative_reward = arm_snap.cumulative_reward;
                arm.alpha = arm_snap.alpha;
                arm.beta = arm_snap.beta;
                if let Some(a) = &arm_snap.a {
                    for (i, row) in a.iter().enumerate().take(D) {
                        for (j, v) in row.iter().enumerate().take(D) {
                            arm.a[i][j] = *v;
                        }
                    }
                }
                if let Some(b) = &arm_snap.b {
                    for (i, v) in b.iter().enumerate().take(D) {
                        arm.b[i] = *v;
                    }
                }
            }
        }
        bandit
    }
}

fn identity() -> [[f64; D]; D] {
    let mut m = [[0.0; D]; D];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite matrix.
/// `A = I + Σ x xᵀ` is positive definite by construction, so the factor
/// always exists.
fn cholesky(a: &[[f64; D]; D]) -> [[f64; D]; D] {
    let mut l = [[0.0; D]; D];
    for i in 0..D {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                l[i][j] = sum.max(1e-12).sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }
    l
}

/// Solve `A x = rhs` given the Cholesky factor `L` (forward then backward
/// substitution).
fn solve(l: &[[f64; D]; D], rhs: &[f64; D]) -> [f64; D] {
    let mut y = [0.0; D];
    for i in 0..D {
        let mut sum = rhs[i];
        for k in 0..i {
            sum -= l[i][k] * y[k];
        }
        y[i] = sum / l[i][i];
    }
    let mut x = [0.0; D];
    for i in (0..D).rev() {
        let mut sum = y[i];
        for k in (i + 1)..D {
            sum -= l[k][i] * x[k];
        }
        x[i] = sum / l[i][i];
    }
    x
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
