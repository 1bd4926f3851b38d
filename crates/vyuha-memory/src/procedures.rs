// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Procedural memory: crystallizing repeated tool sequences.
//!
//! Sessions leave behind traces of `(tool, args, success)` calls.  The
//! extractor mines tool-name n-grams (length 2–5) across sessions, keeps
//! the ones that recur often enough and succeed reliably enough, and
//! anti-unifies their argument objects: positions with identical literals
//! become constants, the rest become typed parameters.  The surviving
//! sequences are stored as procedures, indexed by
//! `(project, fnv1a(step-sequence))`, matched to user queries by trigger
//! phrase overlap, and ranked with a Laplace-smoothed Beta sample on ties.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use vyuha_config::MemoryConfig;

use crate::text::{fnv1a64, jaccard, tokenize};

/// Separator for hashing step sequences; never appears in tool names.
const STEP_SEPARATOR: char = '\u{1f}';

/// One tool invocation observed in a session.
#[derive(Debug, Clone)]
pub struct TraceCall {
    pub tool_name: String,
    pub args_json: String,
    pub success: bool,
}

/// The per-session input to extraction.
#[derive(Debug, Clone)]
pub struct ToolTrace {
    pub session_id: String,
    /// The user message immediately preceding the first tool call; source of
    /// trigger phrases.
    pub user_message: String,
    pub calls: Vec<TraceCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Path,
    Identifier,
}

/// An argument position after anti-unification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgSlot {
    /// Every observed instance shared this literal.
    Constant { value: Value },
    /// Observed values differ; fill at invocation time.
    Parameter { name: String, param_type: ParamType },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureStep {
    pub tool_name: String,
    pub arg_template: BTreeMap<String, ArgSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub id: String,
    pub project: String,
    pub name: String,
    pub steps: Vec<ProcedureStep>,
    /// Verb-object phrases from the user messages that preceded this
    /// sequence, used for query matching.
    pub triggers: Vec<String>,
    pub parameter_schema: Value,
    pub success_count: u32,
    pub failure_count: u32,
    pub learned_from: Vec<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Procedure {
    /// Laplace-smoothed success rate.
    pub fn success_rate(&self) -> f64 {
        (self.success_count as f64 + 1.0)
            / (self.success_count as f64 + self.failure_count as f64 + 2.0)
    }

    /// Stable hash of the step sequence — the second half of the index key.
    pub fn step_key(&self) -> u64 {
        step_key(self.steps.iter().map(|s| s.tool_name.as_str()))
    }
}

fn step_key<'a>(names: impl Iterator<Item = &'a str>) -> u64 {
    let joined: String = names.collect::<Vec<_>>().join(&STEP_SEPARATOR.to_string());
    fnv1a64(joined.as_bytes())
}

const TRIGGER_STOPWORDS: &[&str] = &[
    "the", "a", "an", "to", "of", "in", "on", "for", "and", "then", "please", "now", "my",
    "this", "that", "with", "it", "is", "are", "can", "you", "i", "we", "me",
];

/// First verb-object pair of a user message: the first two tokens that
/// survive stopword filtering, joined with a space.
fn trigger_phrase(message: &str) -> Option<String> {
    let words: Vec<String> = tokenize(message)
        .into_iter()
        .filter(|w| !TRIGGER_STOPWORDS.contains(&w.as_str()))
        .collect();
    match words.len() {
        0 => None,
        1 => Some(words[0].clone()),
        _ => Some(format!("{} {}", words[0], words[1])),
    }
}

fn looks_like_path(s: &str) -> bool {
    s.contains('/') || s.contains('\\') || {
        match s.rsplit_once('.') {
            Some((stem, ext)) => {
                !stem.is_empty()
                    && !ext.is_empty()
                    && ext.len() <= 5
                    && ext.chars().all(|c| c.is_ascii_alphanumeric())
            }
            None => false,
        }
    }
}

fn looks_like_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Infer the parameter type from the observed values for one position.
fn infer_param_type(values: &[&Value]) -> ParamType {
    if values.iter().all(|v| v.is_i64() || v.is_u64()) {
        return ParamType::Int;
    }
    let strings: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
    if strings.len() == values.len() && !strings.is_empty() {
        if strings.iter().all(|s| looks_like_path(s)) {
            return ParamType::Path;
        }
        if strings.iter().all(|s| looks_like_identifier(s)) {
            return ParamType::Identifier;
        }
    }
    ParamType::String
}

/// One occurrence of an n-gram inside a session.
struct Instance<'a> {
    session_id: &'a str,
    user_message: &'a str,
    calls: &'a [TraceCall],
}

impl Instance<'_> {
    fn succeeded(&self) -> bool {
        self.calls.iter().all(|c| c.success)
    }
}

pub struct ProcedureExtractor {
    min_sessions: usize,
    min_success_rate: f64,
}

impl ProcedureExtractor {
    pub fn new(cfg: &MemoryConfig) -> Self {
        Self {
            min_sessions: cfg.min_sessions,
            min_success_rate: cfg.min_success_rate,
        }
    }

    /// Mine procedures from session traces.  Deterministic: the same input
    /// always yields the same procedures (timestamps aside), so repeated
    /// extraction is idempotent.
    pub fn extract(
        &self,
        project: &str,
        traces: &[ToolTrace],
        now: DateTime<Utc>,
    ) -> Vec<Procedure> {
        // All n-grams of length 2..=5, grouped by tool-name sequence.
        let mut groups: BTreeMap<String, Vec<Instance>> = BTreeMap::new();
        for trace in traces {
            for n in 2..=5usize {
                if trace.calls.len() < n {
                    break;
                }
                for window in trace.calls.windows(n) {
                    let key = window
                        .iter()
                        .map(|c| c.tool_name.as_str())
                        .collect::<Vec<_>>()
                        .join(&STEP_SEPARATOR.to_string());
                    groups.entry(key).or_default().push(Instance {
                        session_id: &trace.session_id,
                        user_message: &trace.user_message,
                        calls: window,
                    });
                }
            }
        }

        let mut procedures = Vec::new();
        for (key, instances) in &groups {
            let sessions: BTreeSet<&str> = instances.iter().map(|i| i.session_id).collect();
            if sessions.len() < self.min_sessions {
                continue;
            }
            let successes = instances.iter().filter(|i| i.succeeded()).count();
            let rate = successes as f64 / instances.len() as f64;
            if rate < self.min_success_rate {
                continue;
            }

            let tool_names: Vec<&str> = key.split(STEP_SEPARATOR).collect();
            let steps = anti_unify(&tool_names, instances);
            let parameter_schema = schema_for(&steps);

            let triggers: BTreeSet<String> = instances
                .iter()
                .filter_map(|i| trigger_phrase(i.user_message))
                .collect();

            let hash = fnv1a64(key.as_bytes());
            procedures.push(Procedure {
                id: format!("{project}-{hash:016x}"),
                project: project.to_string(),
                name: tool_names.join("-"),
                steps,
                triggers: triggers.into_iter().collect(),
                parameter_schema,
                success_count: successes as u32,
                failure_count: (instances.len() - successes) as u32,
                learned_from: sessions.iter().map(|s| s.to_string()).collect(),
                confidence: 0.5,
                created_at: now,
                updated_at: now,
            });
        }
        procedures
    }
}

/// Anti-unify the argument objects across every instance of one n-gram:
/// a position whose literal agrees everywhere becomes a constant, anything
/// else a typed parameter.
fn anti_unify(tool_names: &[&str], instances: &[Instance]) -> Vec<ProcedureStep> {
    let mut steps = Vec::with_capacity(tool_names.len());
    for (pos, tool_name) in tool_names.iter().enumerate() {
        let parsed: Vec<Value> = instances
            .iter()
            .map(|i| {
                serde_json::from_str(&i.calls[pos].args_json)
                    .unwrap_or_else(|_| Value::Object(Default::default()))
            })
            .collect();

        let mut keys: BTreeSet<String> = BTreeSet::new();
        for v in &parsed {
            if let Value::Object(o) = v {
                keys.extend(o.keys().cloned());
            }
        }

        let mut arg_template = BTreeMap::new();
        for key in keys {
            let values: Vec<&Value> = parsed.iter().filter_map(|v| v.get(&key)).collect();
            let everywhere = values.len() == parsed.len();
            let all_equal = everywhere && values.windows(2).all(|w| w[0] == w[1]);
            let slot = if all_equal {
                ArgSlot::Constant {
                    value: values[0].clone(),
                }
            } else {
                ArgSlot::Parameter {
                    name: format!("{tool_name}_{key}"),
                    param_type: infer_param_type(&values),
                }
            };
            arg_template.insert(key, slot);
        }
        steps.push(ProcedureStep {
            tool_name: tool_name.to_string(),
            arg_template,
        });
    }
    steps
}

fn schema_for(steps: &[ProcedureStep]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for step in steps {
        for slot in step.arg_template.values() {
            if let ArgSlot::Parameter { name, param_type } = slot {
                let ty = match param_type {
                    ParamType::Int => "integer",
                    _ => "string",
                };
                properties.insert(name.clone(), json!({ "type": ty }));
                required.push(Value::String(name.clone()));
            }
        }
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Procedures indexed by `(project, fnv1a(step-sequence))`.
#[derive(Debug, Default)]
pub struct ProcedureIndex {
    procedures: BTreeMap<(String, u64), Procedure>,
}

impl ProcedureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    pub fn get(&self, project: &str, step_key: u64) -> Option<&Procedure> {
        self.procedures.get(&(project.to_string(), step_key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }

    /// Insert a freshly extracted procedure, or merge it into the existing
    /// entry: contributing sessions are unioned and the confidence nudged
    /// toward 1 by `0.05 × new_sessions`.
    pub fn upsert(&mut self, proc_: Procedure, now: DateTime<Utc>) {
        let key = (proc_.project.clone(), proc_.step_key());
        match self.procedures.get_mut(&key) {
            None => {
                self.procedures.insert(key, proc_);
            }
            Some(existing) => {
                let known: HashSet<&String> = existing.learned_from.iter().collect();
                let new_sessions = proc_
                    .learned_from
                    .iter()
                    .filter(|s| !known.contains(s))
                    .count();
                let mut merged: BTreeSet<String> =
                    existing.learned_from.iter().cloned().collect();
                merged.extend(proc_.learned_from.iter().cloned());
                existing.learned_from = merged.into_iter().collect();
                existing.confidence =
                    (existing.confidence + 0.05 * new_sessions as f64).min(1.0);
                existing.success_count += proc_.success_count;
                existing.failure_count += proc_.failure_count;
                let mut triggers: BTreeSet<String> =
                    existing.triggers.iter().cloned().collect();
                triggers.extend(proc_.triggers.iter().cloned());
                existing.triggers = triggers.into_iter().collect();
                existing.updated_at = now;
            }
        }
    }

    /// Record an execution outcome for a stored procedure.
    pub fn record_outcome(&mut self, project: &str, step_key: u64, success: bool) {
        if let Some(p) = self.procedures.get_mut(&(project.to_string(), step_key)) {
            if success {
                p.success_count += 1;
            } else {
                p.failure_count += 1;
            }
        }
    }

    /// Match a user query against trigger phrases by Jaccard overlap;
    /// equal-scoring candidates are separated by sampling
    /// `Beta(success+1, failure+1)` with the given seed.
    pub fn match_query(&self, project: &str, query: &str, seed: u64) -> Option<&Procedure> {
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        let mut best_score = 0.0f64;
        let mut tied: Vec<&Procedure> = Vec::new();

        for p in self.procedures.values().filter(|p| p.project == project) {
            let score = p
                .triggers
                .iter()
                .map(|t| {
                    let trigger_tokens: HashSet<String> = tokenize(t).into_iter().collect();
                    jaccard(&query_tokens, &trigger_tokens)
                })
                .fold(0.0f64, f64::max);
            if score <= 0.0 {
                continue;
            }
            if score > best_score + 1e-12 {
                best_score = score;
                tied = vec![p];
            } else if (score - best_score).abs() <= 1e-12 {
                tied.push(p);
            }
        }

        match tied.len() {
            0 => None,
            1 => Some(tied[0]),
            _ => {
                let mut rng = StdRng::seed_from_u64(seed);
                tied.into_iter()
                    .map(|p| {
                        let dist = Beta::new(
                            p.success_count as f64 + 1.0,
                            p.failure_count as f64 + 1.0,
                        )
                        .expect("positive beta parameters");
                        (p, dist.sample(&mut rng))
                    })
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(p, _)| p)
            }
        }
    }

    /// Flat list for persistence.
    pub fn to_list(&self) -> Vec<Procedure> {
        self.procedures.values().cloned().collect()
    }

    pub fn from_list(list: Vec<Procedure>) -> Self {
        let mut index = Self::new();
        for p in list {
            let key = (p.project.clone(), p.step_key());
            index.procedures.insert(key, p);
        }
        index
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn call(tool: &str, args: &str, success: bool) -> TraceCall {
        TraceCall {
            tool_name: tool.into(),
            args_json: args.into(),
            success,
        }
    }

    /// Three sessions that all read a file then edit it.
    fn read_edit_traces() -> Vec<ToolTrace> {
        vec![
            ToolTrace {
                session_id: "s1".into(),
                user_message: "fix the typo in the readme".into(),
                calls: vec![
                    call("read", r#"{"path":"README.md"}"#, true),
                    call("edit", r#"{"path":"README.md","insert":"x"}"#, true),
                ],
            },
            ToolTrace {
                session_id: "s2".into(),
                user_message: "fix the typo in the changelog".into(),
                calls: vec![
                    call("read", r#"{"path":"CHANGELOG.md"}"#, true),
                    call("edit", r#"{"path":"CHANGELOG.md","insert":"y"}"#, true),
                ],
            },
            ToolTrace {
                session_id: "s3".into(),
                user_message: "fix typo docs".into(),
                calls: vec![
                    call("read", r#"{"path":"docs/guide.md"}"#, true),
                    call("edit", r#"{"path":"docs/guide.md","insert":"z"}"#, true),
                ],
            },
        ]
    }

    fn extractor() -> ProcedureExtractor {
        ProcedureExtractor::new(&MemoryConfig::default())
    }

    // ── Thresholds ────────────────────────────────────────────────────────────

    #[test]
    fn min_sessions_minus_one_produces_nothing() {
        let traces = &read_edit_traces()[..2];
        assert!(extractor().extract("proj", traces, now()).is_empty());
    }

    #[test]
    fn exactly_min_sessions_produces_a_procedure() {
        let procs = extractor().extract("proj", &read_edit_traces(), now());
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].name, "read-edit");
    }

    #[test]
    fn success_rate_below_threshold_is_dropped() {
        let mut traces = read_edit_traces();
        // 1 of 3 instances fails → rate 2/3 < 0.8.
        traces[0].calls[1].success = false;
        assert!(extractor().extract("proj", &traces, now()).is_empty());
    }

    #[test]
    fn success_rate_exactly_at_threshold_is_kept() {
        // 5 sessions, 1 failing instance → rate exactly 0.8.
        let mut traces = read_edit_traces();
        traces.push(ToolTrace {
            session_id: "s4".into(),
            user_message: "fix typo again".into(),
            calls: vec![
                call("read", r#"{"path":"a.md"}"#, true),
                call("edit", r#"{"path":"a.md","insert":"w"}"#, true),
            ],
        });
        traces.push(ToolTrace {
            session_id: "s5".into(),
            user_message: "fix typo once more".into(),
            calls: vec![
                call("read", r#"{"path":"b.md"}"#, true),
                call("edit", r#"{"path":"b.md","insert":"v"}"#, false),
            ],
        });
        let procs = extractor().extract("proj", &traces, now());
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].success_count, 4);
        assert_eq!(procs[0].failure_count, 1);
    }

    // ── Anti-unification ──────────────────────────────────────────────────────

    #[test]
    fn varying_argument_becomes_typed_parameter() {
        let procs = extractor().extract("proj", &read_edit_traces(), now());
        let read_step = &procs[0].steps[0];
        match &read_step.arg_template["path"] {
            ArgSlot::Parameter { param_type, .. } => {
                assert_eq!(*param_type, ParamType::Path);
            }
            other => panic!("expected parameter, got {other:?}"),
        }
    }

    #[test]
    fn shared_literal_becomes_constant() {
        let traces: Vec<ToolTrace> = (1..=3)
            .map(|i| ToolTrace {
                session_id: format!("s{i}"),
                user_message: "run the tests".into(),
                calls: vec![
                    call("shell", r#"{"command":"cargo test"}"#, true),
                    call("read", &format!(r#"{{"path":"log{i}.txt"}}"#), true),
                ],
            })
            .collect();
        let procs = extractor().extract("proj", &traces, now());
        let shell_step = &procs[0].steps[0];
        assert_eq!(
            shell_step.arg_template["command"],
            ArgSlot::Constant {
                value: json!("cargo test")
            }
        );
    }

    #[test]
    fn integer_values_infer_int_type() {
        let traces: Vec<ToolTrace> = (1..=3)
            .map(|i| ToolTrace {
                session_id: format!("s{i}"),
                user_message: "show lines".into(),
                calls: vec![
                    call("read", &format!(r#"{{"offset":{i}}}"#), true),
                    call("edit", r#"{"x":"y"}"#, true),
                ],
            })
            .collect();
        let procs = extractor().extract("proj", &traces, now());
        match &procs[0].steps[0].arg_template["offset"] {
            ArgSlot::Parameter { param_type, .. } => assert_eq!(*param_type, ParamType::Int),
            other => panic!("expected parameter, got {other:?}"),
        }
    }

    #[test]
    fn identifier_values_infer_identifier_type() {
        let traces: Vec<ToolTrace> = ["alpha", "beta_2", "gamma"]
            .iter()
            .enumerate()
            .map(|(i, name)| ToolTrace {
                session_id: format!("s{i}"),
                user_message: "rename symbol".into(),
                calls: vec![
                    call("grep", &format!(r#"{{"symbol":"{name}"}}"#), true),
                    call("edit", r#"{"x":"y"}"#, true),
                ],
            })
            .collect();
        let procs = extractor().extract("proj", &traces, now());
        match &procs[0].steps[0].arg_template["symbol"] {
            ArgSlot::Parameter { param_type, .. } => {
                assert_eq!(*param_type, ParamType::Identifier)
            }
            other => panic!("expected parameter, got {other:?}"),
        }
    }

    #[test]
    fn parameter_schema_lists_every_parameter() {
        let procs = extractor().extract("proj", &read_edit_traces(), now());
        let schema = &procs[0].parameter_schema;
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("read_path"));
        assert!(props.contains_key("edit_path"));
        assert!(props.contains_key("edit_insert"));
    }

    // ── Triggers ──────────────────────────────────────────────────────────────

    #[test]
    fn triggers_are_verb_object_pairs() {
        let procs = extractor().extract("proj", &read_edit_traces(), now());
        assert!(procs[0].triggers.contains(&"fix typo".to_string()));
    }

    // ── Determinism ───────────────────────────────────────────────────────────

    #[test]
    fn extraction_is_idempotent_modulo_timestamps() {
        let a = extractor().extract("proj", &read_edit_traces(), now());
        let b = extractor().extract("proj", &read_edit_traces(), now());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.steps, y.steps);
            assert_eq!(x.triggers, y.triggers);
            assert_eq!(x.learned_from, y.learned_from);
        }
    }

    // ── Success rate ──────────────────────────────────────────────────────────

    #[test]
    fn success_rate_is_laplace_smoothed() {
        let procs = extractor().extract("proj", &read_edit_traces(), now());
        let p = &procs[0];
        // 3 successes, 0 failures → (3+1)/(3+0+2) = 0.8
        assert!((p.success_rate() - 0.8).abs() < 1e-9);
    }

    // ── Index ─────────────────────────────────────────────────────────────────

    #[test]
    fn upsert_new_procedure_inserts() {
        let mut index = ProcedureIndex::new();
        let procs = extractor().extract("proj", &read_edit_traces(), now());
        index.upsert(procs[0].clone(), now());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn upsert_existing_unions_sessions_and_nudges_confidence() {
        let mut index = ProcedureIndex::new();
        let procs = extractor().extract("proj", &read_edit_traces(), now());
        index.upsert(procs[0].clone(), now());

        let mut rediscovered = procs[0].clone();
        rediscovered.learned_from = vec!["s3".into(), "s4".into(), "s5".into()];
        index.upsert(rediscovered, now());

        let stored = index.get("proj", procs[0].step_key()).unwrap();
        assert_eq!(stored.learned_from, vec!["s1", "s2", "s3", "s4", "s5"]);
        // Two genuinely new sessions → +0.10 over the initial 0.5.
        assert!((stored.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_capped_at_one() {
        let mut index = ProcedureIndex::new();
        let procs = extractor().extract("proj", &read_edit_traces(), now());
        index.upsert(procs[0].clone(), now());
        for i in 0..30 {
            let mut p = procs[0].clone();
            p.learned_from = vec![format!("fresh-{i}")];
            index.upsert(p, now());
        }
        assert!(index.get("proj", procs[0].step_key()).unwrap().confidence <= 1.0);
    }

    #[test]
    fn match_query_by_trigger_overlap() {
        let mut index = ProcedureIndex::new();
        for p in extractor().extract("proj", &read_edit_traces(), now()) {
            index.upsert(p, now());
        }
        let matched = index.match_query("proj", "please fix the typo", 7).unwrap();
        assert_eq!(matched.name, "read-edit");
    }

    #[test]
    fn match_query_no_overlap_returns_none() {
        let mut index = ProcedureIndex::new();
        for p in extractor().extract("proj", &read_edit_traces(), now()) {
            index.upsert(p, now());
        }
        assert!(index.match_query("proj", "deploy the service", 7).is_none());
    }

    #[test]
    fn match_query_tie_break_prefers_successful_procedure() {
        let mut index = ProcedureIndex::new();
        let mut a = extractor().extract("proj", &read_edit_traces(), now())[0].clone();
        a.triggers = vec!["fix typo".into()];
        a.success_count = 50;
        a.failure_count = 0;
        let mut b = a.clone();
        b.steps.push(ProcedureStep {
            tool_name: "shell".into(),
            arg_template: BTreeMap::new(),
        });
        b.success_count = 0;
        b.failure_count = 50;
        index.upsert(a.clone(), now());
        index.upsert(b, now());

        // With a strongly separated posterior the sample almost surely picks
        // the successful procedure; the seed pins the outcome.
        let matched = index.match_query("proj", "fix typo", 3).unwrap();
        assert_eq!(matched.step_key(), a.step_key());
    }

    #[test]
    fn match_query_is_scoped_to_project() {
        let mut index = ProcedureIndex::new();
        for p in extractor().extract("proj", &read_edit_traces(), now()) {
            index.upsert(p, now());
        }
        assert!(index.match_query("other", "fix the typo", 7).is_none());
    }

    #[test]
    fn index_round_trips_through_list() {
        let mut index = ProcedureIndex::new();
        for p in extractor().extract("proj", &read_edit_traces(), now()) {
            index.upsert(p, now());
        }
        let rebuilt = ProcedureIndex::from_list(index.to_list());
        assert_eq!(rebuilt.len(), index.len());
        let key = index.iter().next().unwrap().step_key();
        assert_eq!(
            rebuilt.get("proj", key).unwrap().name,
            index.get("proj", key).unwrap().name
        );
    }
}
