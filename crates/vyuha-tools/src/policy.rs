// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic policy evaluation over tool actions.
//!
//! Rules are visited in registration order; the first `deny` short-circuits,
//! `warn`s accumulate, and the absence of any verdict is `allow`.  Rules are
//! pure functions of `(action, context)` — no side effects, no clock reads —
//! so a given call always evaluates to the same decision.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;

use vyuha_config::ToolsConfig;

/// Classes of action the evaluator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    FileRead,
    FileWrite,
    FileDelete,
    ShellExec,
    NetworkRequest,
    LlmCall,
    /// Generic tool invocation not covered by a more specific class.
    ToolCall,
}

/// One action under evaluation.
#[derive(Debug, Clone)]
pub struct Action<'a> {
    pub kind: ActionKind,
    pub tool_name: &'a str,
    pub args: &'a Value,
}

/// Rolling facts about the session the rules may consult.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub project_root: PathBuf,
    pub files_modified: Vec<PathBuf>,
    pub commands_run: Vec<String>,
    pub cost_so_far: f64,
    pub cost_budget: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Warn,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSeverity {
    Info,
    Warning,
    Critical,
}

/// A single ordered policy rule.
pub struct PolicyRule {
    pub id: &'static str,
    pub category: &'static str,
    pub severity: RuleSeverity,
    #[allow(clippy::type_complexity)]
    evaluate: Box<dyn Fn(&Action, &PolicyContext) -> Option<(Verdict, String)> + Send + Sync>,
}

impl PolicyRule {
    pub fn new(
        id: &'static str,
        category: &'static str,
        severity: RuleSeverity,
        evaluate: impl Fn(&Action, &PolicyContext) -> Option<(Verdict, String)>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            id,
            category,
            severity,
            evaluate: Box::new(evaluate),
        }
    }
}

/// The outcome of evaluating one action against every rule.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub verdict: Verdict,
    /// `(rule id, reason)` for the denying rule, when denied.
    pub denied_by: Option<(String, String)>,
    /// Accumulated `(rule id, reason)` warnings.
    pub warnings: Vec<(String, String)>,
}

impl PolicyDecision {
    pub fn allowed(&self) -> bool {
        self.verdict != Verdict::Deny
    }
}

/// Ordered rule list with first-deny-wins evaluation.
pub struct PolicyEngine {
    rules: Vec<PolicyRule>,
}

impl PolicyEngine {
    /// Engine with no rules: everything is allowed.
    pub fn permissive() -> Self {
        Self { rules: Vec::new() }
    }

    /// Engine with the built-in rule set derived from `cfg`:
    /// project-root escape denial, destructive shell denial, cost-budget
    /// denial, and a warning for network requests to unlisted hosts.
    pub fn with_builtin_rules(cfg: &ToolsConfig) -> Self {
        let mut engine = Self::permissive();
        engine.push(root_escape_rule());
        engine.push(destructive_shell_rule(&cfg.deny_patterns));
        engine.push(cost_budget_rule());
        engine.push(network_host_rule(cfg.allowed_hosts.clone()));
        engine
    }

    /// Append a rule.  Order of insertion is order of evaluation.
    pub fn push(&mut self, rule: PolicyRule) {
        self.rules.push(rule);
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id).collect()
    }

    /// Visit rules in order; the first deny short-circuits, warns accumulate,
    /// and no verdict at all means allow.
    pub fn evaluate(&self, action: &Action, ctx: &PolicyContext) -> PolicyDecision {
        let mut warnings = Vec::new();
        for rule in &self.rules {
            match (rule.evaluate)(action, ctx) {
                Some((Verdict::Deny, reason)) => {
                    return PolicyDecision {
                        verdict: Verdict::Deny,
                        denied_by: Some((rule.id.to_string(), reason)),
                        warnings,
                    };
                }
                Some((Verdict::Warn, reason)) => {
                    warnings.push((rule.id.to_string(), reason));
                }
                Some((Verdict::Allow, _)) | None => {}
            }
        }
        PolicyDecision {
            verdict: if warnings.is_empty() {
                Verdict::Allow
            } else {
                Verdict::Warn
            },
            denied_by: None,
            warnings,
        }
    }
}

// ─── Built-in rules ───────────────────────────────────────────────────────────

fn arg_path(args: &Value) -> Option<&str> {
    args.get("path").and_then(|v| v.as_str())
}

/// Lexical containment check.  `path` is resolved against `root` when
/// relative; `..` components walk the resolved path upward.
fn escapes_root(root: &Path, path: &str) -> bool {
    if root.as_os_str().is_empty() {
        return false;
    }
    let candidate = Path::new(path);
    let mut resolved = if candidate.is_absolute() {
        PathBuf::new()
    } else {
        root.to_path_buf()
    };
    for comp in candidate.components() {
        match comp {
            std::path::Component::ParentDir => {
                resolved.pop();
            }
            std::path::Component::CurDir => {}
            other => resolved.push(other),
        }
    }
    !resolved.starts_with(root)
}

fn root_escape_rule() -> PolicyRule {
    PolicyRule::new(
        "fs.root-escape",
        "filesystem",
        RuleSeverity::Critical,
        |action, ctx| {
            if !matches!(action.kind, ActionKind::FileWrite | ActionKind::FileDelete) {
                return None;
            }
            let path = arg_path(action.args)?;
            if escapes_root(&ctx.project_root, path) {
                return Some((
                    Verdict::Deny,
                    format!("path '{path}' escapes the project root"),
                ));
            }
            None
        },
    )
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

fn destructive_shell_rule(patterns: &[String]) -> PolicyRule {
    let compiled: Vec<Regex> = patterns.iter().filter_map(|p| glob_to_regex(p)).collect();
    PolicyRule::new(
        "shell.destructive",
        "shell",
        RuleSeverity::Critical,
        move |action, _ctx| {
            if action.kind != ActionKind::ShellExec {
                return None;
            }
            let command = action.args.get("command").and_then(|v| v.as_str())?;
            for re in &compiled {
                if re.is_match(command) {
                    return Some((
                        Verdict::Deny,
                        format!("command matches destructive pattern '{re}'"),
                    ));
                }
            }
            None
        },
    )
}

fn cost_budget_rule() -> PolicyRule {
    PolicyRule::new(
        "cost.budget",
        "cost",
        RuleSeverity::Critical,
        |_action, ctx| {
            let budget = ctx.cost_budget?;
            if ctx.cost_so_far >= budget {
                return Some((
                    Verdict::Deny,
                    format!(
                        "cumulative cost {:.4} reached the budget {:.4}",
                        ctx.cost_so_far, budget
                    ),
                ));
            }
            None
        },
    )
}

fn network_host_rule(allowed_hosts: Vec<String>) -> PolicyRule {
    PolicyRule::new(
        "net.unlisted-host",
        "network",
        RuleSeverity::Warning,
        move |action, _ctx| {
            if action.kind != ActionKind::NetworkRequest {
                return None;
            }
            let url = action.args.get("url").and_then(|v| v.as_str())?;
            let host = url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .split('/')
                .next()
                .unwrap_or("");
            if allowed_hosts.iter().any(|h| h == host) {
                return None;
            }
            Some((
                Verdict::Warn,
                format!("request to host '{host}' which is not on the allow list"),
            ))
        },
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
