// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Task queue, slot pool, and strategy dispatch.
//!
//! Tasks queue by priority (FIFO within a priority) and become ready when
//! every dependency has completed successfully.  Each ready task is
//! dispatched with the strategy the bandit picks for the observed context:
//! round-robin rotation, least-loaded, capability-specialized, hierarchical
//! decomposition, swarm, or a competitive race.  Outcomes feed the bandit,
//! the performance history, and the strategy ban list; state snapshots are
//! written atomically every `autosave_interval` outcomes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_recursion::async_recursion;
use chrono::{DateTime, Duration, Utc};
use futures::future::{join_all, select_all};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vyuha_config::OrchestratorConfig;
use vyuha_tools::cancel::CancellationToken;

use crate::bandit::StrategyBandit;
use crate::error::OrchestratorError;
use crate::persist::{save_state, OrchestratorSnapshot};
use crate::strategy::{compute_reward, ContextVector, Strategy};
use crate::task::{AgentSlot, SlotExecutor, Task, TaskOutcome, TaskStatus};

/// Temporary exclusion of a strategy after persistent failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyBan {
    pub strategy: Strategy,
    pub reason: String,
    pub banned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub failure_rate: f64,
}

/// One dispatched task's outcome, as persisted in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPerformanceRecord {
    pub task_id: String,
    pub strategy: Strategy,
    pub success: bool,
    pub reward: f64,
    pub duration_ms: u64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_cost: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Returned by [`Orchestrator::dispatch_next`].
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: String,
    pub strategy: Strategy,
    pub outcome: TaskOutcome,
    pub reward: f64,
}

struct QueueEntry {
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct TrialCounter {
    trials: u32,
    failures: u32,
}

pub struct Orchestrator {
    cfg: OrchestratorConfig,
    bandit: StrategyBandit,
    executor: Arc<dyn SlotExecutor>,
    slots: Mutex<Vec<AgentSlot>>,
    queue: Mutex<VecDeque<QueueEntry>>,
    seq: AtomicU64,
    /// Completed task id → success flag; gates dependent tasks.
    completed: Mutex<HashMap<String, bool>>,
    rotation: AtomicUsize,
    bans: Mutex<Vec<StrategyBan>>,
    trials: Mutex<HashMap<Strategy, TrialCounter>>,
    history: Mutex<Vec<TaskPerformanceRecord>>,
    outcomes_since_save: AtomicU32,
    save_path: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(cfg: OrchestratorConfig, executor: Arc<dyn SlotExecutor>) -> Self {
        let bandit = StrategyBandit::new(cfg.bandit_mode, cfg.bandit_seed);
        Self {
            cfg,
            bandit,
            executor,
            slots: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            seq: AtomicU64::new(0),
            completed: Mutex::new(HashMap::new()),
            rotation: AtomicUsize::new(0),
            bans: Mutex::new(Vec::new()),
            trials: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            outcomes_since_save: AtomicU32::new(0),
            save_path: None,
        }
    }

    /// Rebuild an orchestrator from a persisted snapshot.
    pub fn from_snapshot(
        cfg: OrchestratorConfig,
        executor: Arc<dyn SlotExecutor>,
        snapshot: OrchestratorSnapshot,
    ) -> Self {
        let mut orch = Self::new(cfg, executor);
        orch.bandit = StrategyBandit::restore(&snapshot.bandit);
        orch.history = Mutex::new(snapshot.history);
        orch.bans = Mutex::new(snapshot.bans);
        orch
    }

    /// Enable atomic state autosaving to `path`.
    pub fn with_save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = Some(path.into());
        self
    }

    pub fn register_slot(&self, slot: AgentSlot) {
        self.slots.lock().unwrap().push(slot);
    }

    /// Current slot statistics.  Empty when no agents are registered.
    pub fn agent_stats(&self) -> Vec<AgentSlot> {
        self.slots.lock().unwrap().clone()
    }

    /// Externally reported slot load, consulted by least-loaded dispatch.
    pub fn report_slot_load(&self, slot_id: &str, running: usize, queued: usize) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|s| s.id == slot_id) {
            slot.running_task_count = running;
            slot.queued_task_count = queued;
            slot.busy = running > 0;
        }
    }

    pub fn submit(&self, task: Task) -> String {
        let id = task.id.clone();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().unwrap().push_back(QueueEntry { seq, task });
        id
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn history(&self) -> Vec<TaskPerformanceRecord> {
        self.history.lock().unwrap().clone()
    }

    // ── Bans ─────────────────────────────────────────────────────────────────

    pub fn active_bans(&self) -> Vec<StrategyBan> {
        self.active_bans_at(Utc::now())
    }

    pub fn active_bans_at(&self, now: DateTime<Utc>) -> Vec<StrategyBan> {
        self.bans
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.expires_at > now)
            .cloned()
            .collect()
    }

    pub fn is_banned(&self, strategy: Strategy) -> bool {
        self.active_bans().iter().any(|b| b.strategy == strategy)
    }

    /// Lift any active ban on `strategy`.
    pub fn unban(&self, strategy: Strategy) {
        self.bans.lock().unwrap().retain(|b| b.strategy != strategy);
    }

    /// Record one strategy outcome for ban bookkeeping.  Called internally
    /// after every dispatch; exposed for callers that run strategies
    /// out-of-band.
    pub fn note_strategy_outcome(&self, strategy: Strategy, success: bool) {
        self.note_strategy_outcome_at(strategy, success, Utc::now());
    }

    pub fn note_strategy_outcome_at(
        &self,
        strategy: Strategy,
        success: bool,
        now: DateTime<Utc>,
    ) {
        let mut trials = self.trials.lock().unwrap();
        let counter = trials.entry(strategy).or_default();
        counter.trials += 1;
        if !success {
            counter.failures += 1;
        }
        if counter.trials < self.cfg.ban_min_tasks {
            return;
        }
        let failure_rate = counter.failures as f64 / counter.trials as f64;
        if failure_rate <= self.cfg.ban_failure_threshold {
            return;
        }
        if self
            .active_bans_at(now)
            .iter()
            .any(|b| b.strategy == strategy)
        {
            return;
        }
        warn!(
            strategy = strategy.as_str(),
            failure_rate, "banning persistently failing strategy"
        );
        self.bans.lock().unwrap().push(StrategyBan {
            strategy,
            reason: format!("failure rate {failure_rate:.2} over {} tasks", counter.trials),
            banned_at: now,
            expires_at: now + Duration::milliseconds(self.cfg.ban_duration_ms),
            failure_rate,
        });
        // Fresh evidence is required before a re-ban after expiry.
        *counter = TrialCounter::default();
    }

    /// The strategy the bandit would use right now.  `None` when every
    /// strategy is banned (dispatch then falls back to round-robin).
    pub fn select_strategy(&self, ctx: &ContextVector) -> Option<Strategy> {
        let banned: HashSet<Strategy> = self
            .active_bans()
            .iter()
            .map(|b| b.strategy)
            .collect();
        self.bandit.select(ctx, &banned)
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    /// Dispatch the highest-priority ready task, if any.
    pub async fn dispatch_next(
        &self,
        ctx: &ContextVector,
    ) -> Result<Option<TaskReport>, OrchestratorError> {
        if self.slots.lock().unwrap().is_empty() {
            return Err(OrchestratorError::NoSlots);
        }
        let Some(mut task) = self.pop_ready() else {
            return Ok(None);
        };

        let strategy = self.select_strategy(ctx).unwrap_or(Strategy::RoundRobin);
        debug!(task = %task.id, strategy = strategy.as_str(), "dispatching task");
        task.status = TaskStatus::Running;

        let outcome = self
            .execute_with_strategy(strategy, &task, CancellationToken::new())
            .await;

        task.status = if outcome.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.completed
            .lock()
            .unwrap()
            .insert(task.id.clone(), outcome.success);

        let reward = compute_reward(
            &self.cfg.reward_weights,
            outcome.success,
            outcome.duration_ms,
            task.expected_duration_ms,
            outcome.cost,
            task.budget_cost,
        );
        self.bandit.update(strategy, reward, ctx);
        self.note_strategy_outcome(strategy, outcome.success);
        self.history.lock().unwrap().push(TaskPerformanceRecord {
            task_id: task.id.clone(),
            strategy,
            success: outcome.success,
            reward,
            duration_ms: outcome.duration_ms,
            cost: outcome.cost,
            expected_duration_ms: task.expected_duration_ms,
            budget_cost: task.budget_cost,
            recorded_at: Utc::now(),
        });
        self.maybe_autosave()?;

        Ok(Some(TaskReport {
            task_id: task.id,
            strategy,
            outcome,
            reward,
        }))
    }

    /// Pop the best ready task: lowest priority value first, FIFO within a
    /// priority.  A task is ready when every dependency completed
    /// successfully; tasks with failed dependencies stay queued forever and
    /// are surfaced by [`Self::queue_len`].
    fn pop_ready(&self) -> Option<Task> {
        let completed = self.completed.lock().unwrap();
        let mut queue = self.queue.lock().unwrap();
        let best = queue
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.task
                    .dependencies
                    .iter()
                    .all(|d| completed.get(d).copied() == Some(true))
            })
            .min_by_key(|(_, e)| (e.task.priority, e.seq))
            .map(|(i, _)| i)?;
        queue.remove(best).map(|e| e.task)
    }

    async fn execute_with_strategy(
        &self,
        strategy: Strategy,
        task: &Task,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        match strategy {
            Strategy::RoundRobin => {
                let slot = {
                    let slots = self.slots.lock().unwrap();
                    let idx = self.rotation.fetch_add(1, Ordering::Relaxed) % slots.len();
                    slots[idx].clone()
                };
                self.run_on_slot(slot, task, cancel).await
            }
            Strategy::LeastLoaded => {
                let slot = self.least_loaded_slot();
                self.run_on_slot(slot, task, cancel).await
            }
            Strategy::Specialized => {
                let slot = self.specialized_slot(&task.description);
                self.run_on_slot(slot, task, cancel).await
            }
            Strategy::Hierarchical => {
                self.run_hierarchical(task, 0, cancel).await
            }
            Strategy::Swarm => self.run_swarm(task, cancel).await,
            Strategy::Competitive => self.run_competitive(task, cancel).await,
        }
    }

    async fn run_on_slot(
        &self,
        slot: AgentSlot,
        task: &Task,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        self.adjust_slot_load(&slot.id, 1);
        let outcome = self.executor.run(&slot, task, cancel).await;
        self.adjust_slot_load(&slot.id, -1);
        outcome
    }

    fn adjust_slot_load(&self, slot_id: &str, delta: isize) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|s| s.id == slot_id) {
            slot.running_task_count = slot.running_task_count.saturating_add_signed(delta);
            slot.busy = slot.running_task_count > 0;
        }
    }

    /// Fewest running tasks, then fewest queued, then lowest id.
    fn least_loaded_slot(&self) -> AgentSlot {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .min_by(|a, b| {
                a.running_task_count
                    .cmp(&b.running_task_count)
                    .then_with(|| a.queued_task_count.cmp(&b.queued_task_count))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .expect("dispatch checked slots")
            .clone()
    }

    /// Maximize Jaccard overlap between description-derived capability
    /// hints and slot capabilities; ties go to the lower slot id.
    fn specialized_slot(&self, description: &str) -> AgentSlot {
        let hints = capability_hints(description);
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .max_by(|a, b| {
                let ja = jaccard(&hints, &a.capabilities);
                let jb = jaccard(&hints, &b.capabilities);
                ja.partial_cmp(&jb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .expect("dispatch checked slots")
            .clone()
    }

    /// Decompose the description on " then " (sequential stages) and
    /// " and " (parallel parts), execute stage by stage, and merge outputs.
    /// Nested phrases recurse up to the configured depth.
    #[async_recursion]
    async fn run_hierarchical(
        &self,
        task: &Task,
        depth: usize,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        let stages: Vec<&str> = task.description.split(" then ").collect();
        if stages.len() == 1 && !task.description.contains(" and ") {
            let slot = self.least_loaded_slot();
            return self.run_on_slot(slot, task, cancel).await;
        }

        let mut outputs = Vec::new();
        let mut duration_ms = 0u64;
        let mut cost = 0.0f64;
        for stage in stages {
            let parts: Vec<&str> = stage.split(" and ").collect();
            let sub_outcomes = join_all(parts.iter().map(|part| {
                let sub = Task::new(task.kind.clone(), part.trim().to_string());
                let child_cancel = cancel.child();
                async move {
                    if depth + 1 < self.cfg.hierarchical_max_depth
                        && (part.contains(" then ") || part.contains(" and "))
                    {
                        self.run_hierarchical(&sub, depth + 1, child_cancel).await
                    } else {
                        let slot = self.least_loaded_slot();
                        self.run_on_slot(slot, &sub, child_cancel).await
                    }
                }
            }))
            .await;

            duration_ms += sub_outcomes.iter().map(|o| o.duration_ms).max().unwrap_or(0);
            cost += sub_outcomes.iter().map(|o| o.cost).sum::<f64>();
            if let Some(failed) = sub_outcomes.iter().find(|o| !o.success) {
                return TaskOutcome {
                    success: false,
                    output: format!("subtask failed: {}", failed.output),
                    duration_ms,
                    cost,
                };
            }
            outputs.extend(sub_outcomes.into_iter().map(|o| o.output));
        }
        TaskOutcome {
            success: true,
            output: outputs.join("\n"),
            duration_ms,
            cost,
        }
    }

    /// Every slot works the task; successful outputs are concatenated in
    /// slot order and metrics aggregated (wall clock by the slowest, cost
    /// summed).
    async fn run_swarm(&self, task: &Task, cancel: CancellationToken) -> TaskOutcome {
        let mut slots = self.agent_stats();
        slots.sort_by(|a, b| a.id.cmp(&b.id));

        let outcomes = join_all(slots.iter().map(|slot| {
            let child_cancel = cancel.child();
            let slot = slot.clone();
            async move { (slot.clone(), self.run_on_slot(slot, task, child_cancel).await) }
        }))
        .await;

        let mut merged = Vec::new();
        for (slot, outcome) in &outcomes {
            if outcome.success {
                self.executor
                    .share_note(slot, &format!("[{}] {}", slot.id, outcome.output))
                    .await;
                merged.push(outcome.output.clone());
            }
        }
        TaskOutcome {
            success: !merged.is_empty(),
            output: merged.join("\n"),
            duration_ms: outcomes.iter().map(|(_, o)| o.duration_ms).max().unwrap_or(0),
            cost: outcomes.iter().map(|(_, o)| o.cost).sum(),
        }
    }

    /// Race `competitive_fanout` slots; the first successful completion
    /// wins and the rest are cancelled.  Slots race in id order, so a
    /// same-tick tie resolves to the lower slot id.
    async fn run_competitive(&self, task: &Task, cancel: CancellationToken) -> TaskOutcome {
        let mut slots = self.agent_stats();
        slots.sort_by(|a, b| a.id.cmp(&b.id));
        slots.truncate(self.cfg.competitive_fanout.max(1));

        let tokens: Vec<CancellationToken> = slots.iter().map(|_| cancel.child()).collect();
        let mut racers = slots
            .iter()
            .zip(&tokens)
            .map(|(slot, token)| {
                let slot = slot.clone();
                let token = token.clone();
                Box::pin(self.run_on_slot(slot, task, token))
            })
            .collect::<Vec<_>>();

        let mut last_failure: Option<TaskOutcome> = None;
        while !racers.is_empty() {
            let (outcome, _idx, remaining) = select_all(racers).await;
            if outcome.success {
                for token in &tokens {
                    token.cancel();
                }
                return outcome;
            }
            last_failure = Some(outcome);
            racers = remaining;
        }
        last_failure
            .unwrap_or_else(|| TaskOutcome::failure("no competitors were available", 0))
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            bandit: self.bandit.snapshot(),
            history: self.history(),
            bans: self.bans.lock().unwrap().clone(),
            version: 1,
        }
    }

    fn maybe_autosave(&self) -> Result<(), OrchestratorError> {
        let Some(path) = &self.save_path else {
            return Ok(());
        };
        let count = self.outcomes_since_save.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.cfg.autosave_interval {
            return Ok(());
        }
        self.outcomes_since_save.store(0, Ordering::SeqCst);
        save_state(path, &self.snapshot())
    }
}

const CAPABILITY_KEYWORDS: &[(&str, &str)] = &[
    ("test", "testing"),
    ("review", "review"),
    ("deploy", "deploy"),
    ("document", "docs"),
    ("readme", "docs"),
    ("research", "research"),
    ("search", "research"),
    ("investigate", "research"),
    ("refactor", "coding"),
    ("implement", "coding"),
    ("fix", "coding"),
    ("build", "coding"),
    ("benchmark", "perf"),
    ("profile", "perf"),
];

/// Capability hints extracted from a task description by keyword table.
fn capability_hints(description: &str) -> Vec<String> {
    let lower = description.to_lowercase();
    let mut hints: Vec<String> = CAPABILITY_KEYWORDS
        .iter()
        .filter(|(kw, _)| lower.contains(kw))
        .map(|(_, cap)| cap.to_string())
        .collect();
    hints.sort();
    hints.dedup();
    hints
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let sa: HashSet<&String> = a.iter().collect();
    let sb: HashSet<&String> = b.iter().collect();
    sa.intersection(&sb).count() as f64 / sa.union(&sb).count() as f64
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
