// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Observer guardians: finding accumulators over turns.
//!
//! Each guardian watches the turn stream for one domain of trouble and
//! emits [`Finding`]s into a bounded ring.  Findings below the configured
//! confidence threshold are dropped at observation time; when a ring is
//! full the oldest finding is evicted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use vyuha_config::GuardianConfig;
use vyuha_model::Role;

use crate::observer::{TurnObservation, TurnObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub id: String,
    pub guardian_id: String,
    pub domain: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub confidence: f64,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Finding {
    fn new(
        guardian_id: &str,
        domain: &str,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            guardian_id: guardian_id.to_string(),
            domain: domain.to_string(),
            severity,
            title: title.into(),
            description: description.into(),
            confidence,
            location: None,
            timestamp: Utc::now(),
        }
    }
}

/// One domain watcher.  Implementations keep their own interior state and
/// return zero or more findings per observed turn.
pub trait Guardian: Send + Sync {
    fn id(&self) -> &str;
    fn domain(&self) -> &str;
    fn observe(&self, observation: &TurnObservation) -> Vec<Finding>;
}

/// A set of guardians sharing the confidence threshold and ring capacity.
pub struct GuardianSet {
    threshold: f64,
    capacity: usize,
    guardians: Vec<(Arc<dyn Guardian>, Mutex<VecDeque<Finding>>)>,
}

impl GuardianSet {
    pub fn new(cfg: &GuardianConfig) -> Self {
        Self {
            threshold: cfg.confidence_threshold,
            capacity: cfg.ring_capacity,
            guardians: Vec::new(),
        }
    }

    pub fn register(&mut self, guardian: Arc<dyn Guardian>) {
        self.guardians.push((guardian, Mutex::new(VecDeque::new())));
    }

    /// Findings currently retained for one guardian, oldest first.
    pub fn findings(&self, guardian_id: &str) -> Vec<Finding> {
        self.guardians
            .iter()
            .find(|(g, _)| g.id() == guardian_id)
            .map(|(_, ring)| ring.lock().unwrap().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_findings(&self) -> Vec<Finding> {
        self.guardians
            .iter()
            .flat_map(|(_, ring)| ring.lock().unwrap().iter().cloned().collect::<Vec<_>>())
            .collect()
    }
}

impl TurnObserver for GuardianSet {
    fn on_turn(&self, observation: &TurnObservation) {
        for (guardian, ring) in &self.guardians {
            let findings = guardian.observe(observation);
            let mut ring = ring.lock().unwrap();
            for f in findings {
                if f.confidence < self.threshold {
                    continue;
                }
                if ring.len() >= self.capacity {
                    ring.pop_front();
                }
                ring.push_back(f);
            }
        }
    }
}

// ─── Correctness guardian ─────────────────────────────────────────────────────

const CORRECTION_PHRASES: &[&str] = &[
    "no,",
    "that's wrong",
    "that is wrong",
    "incorrect",
    "not what i asked",
    "you misunderstood",
];

const TASK_START_PHRASES: &[&str] = &["i'll ", "i will ", "let me ", "starting "];
const TASK_DONE_PHRASES: &[&str] = &["done", "completed", "finished", "all set"];

#[derive(Default)]
struct CorrectnessState {
    consecutive_tool_errors: u32,
    /// Turn at which the assistant last announced a task without finishing.
    open_task_since: Option<u32>,
}

/// Tracks error streaks, user corrections, and stalled announced tasks.
pub struct CorrectnessGuardian {
    stall_window: u32,
    state: Mutex<CorrectnessState>,
}

impl CorrectnessGuardian {
    pub fn new(cfg: &GuardianConfig) -> Self {
        Self {
            stall_window: cfg.stall_window_turns,
            state: Mutex::new(CorrectnessState::default()),
        }
    }
}

impl Guardian for CorrectnessGuardian {
    fn id(&self) -> &str {
        "correctness"
    }

    fn domain(&self) -> &str {
        "correctness"
    }

    fn observe(&self, obs: &TurnObservation) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut state = self.state.lock().unwrap();

        // Tool error streaks: warning at 3 consecutive, critical at 5.
        for result in &obs.tool_results {
            if result.is_error {
                state.consecutive_tool_errors += 1;
            } else {
                state.consecutive_tool_errors = 0;
            }
        }
        if state.consecutive_tool_errors == 3 {
            findings.push(Finding::new(
                self.id(),
                self.domain(),
                Severity::Warning,
                "repeated tool failures",
                format!("{} consecutive tool errors", state.consecutive_tool_errors),
                0.8,
            ));
        } else if state.consecutive_tool_errors >= 5 {
            findings.push(Finding::new(
                self.id(),
                self.domain(),
                Severity::Critical,
                "tool failure streak",
                format!("{} consecutive tool errors", state.consecutive_tool_errors),
                0.95,
            ));
        }

        let lower = obs.content.to_lowercase();

        // User pushes back on a previous answer.
        if obs.role == Role::User && CORRECTION_PHRASES.iter().any(|p| lower.contains(p)) {
            findings.push(Finding::new(
                self.id(),
                self.domain(),
                Severity::Warning,
                "user correction",
                "the user indicated the previous response was wrong",
                0.7,
            ));
        }

        // Task started but never signalled complete within the window.
        if obs.role == Role::Assistant {
            let starts = TASK_START_PHRASES.iter().any(|p| lower.contains(p));
            let completes = TASK_DONE_PHRASES.iter().any(|p| lower.contains(p));
            if completes {
                state.open_task_since = None;
            } else if starts && state.open_task_since.is_none() {
                state.open_task_since = Some(obs.turn);
            }
            if let Some(since) = state.open_task_since {
                if obs.turn.saturating_sub(since) >= self.stall_window {
                    state.open_task_since = None;
                    findings.push(Finding::new(
                        self.id(),
                        self.domain(),
                        Severity::Warning,
                        "announced task not completed",
                        format!("a task announced at turn {since} has no completion signal"),
                        0.65,
                    ));
                }
            }
        }

        findings
    }
}

// ─── Safety guardian ──────────────────────────────────────────────────────────

const DESTRUCTIVE_MARKERS: &[&str] = &[
    "rm -rf",
    "force push",
    "git push --force",
    "drop table",
    "mkfs",
    "sudo ",
];

/// Flags destructive patterns in requested tool calls.
pub struct SafetyGuardian;

impl Guardian for SafetyGuardian {
    fn id(&self) -> &str {
        "safety"
    }

    fn domain(&self) -> &str {
        "safety"
    }

    fn observe(&self, obs: &TurnObservation) -> Vec<Finding> {
        let mut findings = Vec::new();
        for call in &obs.tool_calls {
            let args = call.args_json.to_lowercase();
            for marker in DESTRUCTIVE_MARKERS {
                if args.contains(marker) {
                    findings.push(Finding::new(
                        self.id(),
                        self.domain(),
                        Severity::Critical,
                        "destructive tool call",
                        format!("tool '{}' invoked with '{marker}'", call.name),
                        0.9,
                    ));
                }
            }
        }
        findings
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
