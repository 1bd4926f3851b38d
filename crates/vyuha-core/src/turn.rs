// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The per-agent turn loop: stream the model, execute requested tools under
//! policy and autonomy gates, feed the results back, repeat to termination.
//!
//! Tool calls within one turn execute sequentially in stream order so tool
//! results stay deterministically matched to their call ids.  Local failures
//! (malformed arguments, policy denials, disabled or failing tools) are
//! captured into the conversation as error tool results; structural
//! failures (cancellation, stream errors) propagate to the caller.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use vyuha_config::{AgentConfig, ToolsConfig};
use vyuha_model::{Message, ModelProvider, Part, StopReason};
use vyuha_tools::{
    cancel::CancellationToken, Action, ActionKind, AutonomyGate, PolicyContext, PolicyEngine,
    ToolCall, ToolContext, ToolRegistry,
};

use crate::bus::EventBus;
use crate::context::ContextManager;
use crate::error::CoreError;
use crate::events::Event;
use crate::observer::{ToolCallView, ToolObservation, ToolResultView, TurnObservation, TurnObserver};
use crate::session::AgentState;
use crate::stream::collect_stream;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    EndTurn,
    MaxTokens,
    StopSequence,
    /// The model stopped for tool use but emitted no usable calls.
    NoToolCalls,
    MaxTurns,
}

/// Summary of one completed run, enough for reward computation without
/// scraping the transcript.
#[derive(Debug, Clone)]
pub struct TurnLoopRun {
    pub final_message: Message,
    pub cause: StopCause,
    pub turns_used: u32,
    pub total_cost: f64,
}

/// A per-turn liveness record readable by observers.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub turn: u32,
    pub phase: &'static str,
    pub at: DateTime<Utc>,
}

/// Steering messages enqueued by an external observer.  The loop drains the
/// queue strictly before the next context build — never mid-stream.
#[derive(Clone, Default)]
pub struct SteeringQueue {
    inner: Arc<Mutex<Vec<String>>>,
}

impl SteeringQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, text: impl Into<String>) {
        self.inner.lock().unwrap().push(text.into());
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }
}

pub struct TurnLoop {
    state: AgentState,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    policy: Arc<PolicyEngine>,
    autonomy: Arc<AutonomyGate>,
    context: ContextManager,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    config: AgentConfig,
    steering: SteeringQueue,
    observers: Vec<Arc<dyn TurnObserver>>,
    heartbeats: Arc<Mutex<Vec<Heartbeat>>>,
    policy_ctx: PolicyContext,
    working_dir: PathBuf,
}

impl TurnLoop {
    pub fn new(
        state: AgentState,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        let context = ContextManager::new(config.token_budget);
        Self {
            state,
            provider,
            tools,
            policy: Arc::new(PolicyEngine::permissive()),
            autonomy: Arc::new(AutonomyGate::new(&ToolsConfig::default())),
            context,
            bus: Arc::new(EventBus::new()),
            cancel: CancellationToken::new(),
            config,
            steering: SteeringQueue::new(),
            observers: Vec::new(),
            heartbeats: Arc::new(Mutex::new(Vec::new())),
            policy_ctx: PolicyContext::default(),
            working_dir: PathBuf::from("."),
        }
    }

    pub fn with_policy(mut self, policy: Arc<PolicyEngine>, ctx: PolicyContext) -> Self {
        self.policy = policy;
        self.policy_ctx = ctx;
        self
    }

    pub fn with_autonomy(mut self, autonomy: Arc<AutonomyGate>) -> Self {
        self.autonomy = autonomy;
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn steering(&self) -> SteeringQueue {
        self.steering.clone()
    }

    pub fn heartbeats(&self) -> Vec<Heartbeat> {
        self.heartbeats.lock().unwrap().clone()
    }

    /// Push the user message and run the loop to termination.
    pub async fn run(&mut self, user_input: &str) -> Result<TurnLoopRun, CoreError> {
        self.cancel.check()?;
        self.state.push(Message::user(user_input));
        self.feed_turn(&TurnObservation {
            turn: 0,
            role: vyuha_model::Role::User,
            content: user_input.to_string(),
            tool_calls: vec![],
            tool_results: vec![],
        });

        let session_id = self.state.session_id.clone();
        let mut turn = 0u32;
        let mut total_cost = 0.0f64;

        while turn < self.config.max_turns {
            turn += 1;
            self.bus.emit(&Event::TurnStart {
                session_id: session_id.clone(),
                turn,
            });
            self.record_heartbeat(turn, "turn:start");

            // Observer steering lands before the context build, never
            // mid-stream.
            for steer in self.steering.drain() {
                debug!(turn, "injecting steering message");
                self.state.push(Message::system(steer));
            }

            let req = self.context.build(&self.state);
            self.state.is_streaming = true;
            let stream = match self.provider.stream(req).await {
                Ok(s) => s,
                Err(e) => {
                    self.state.is_streaming = false;
                    let message = e.to_string();
                    self.bus.emit(&Event::StreamError {
                        session_id: session_id.clone(),
                        message: message.clone(),
                    });
                    return Err(CoreError::Stream(message));
                }
            };
            let outcome = collect_stream(stream, &session_id, &self.bus, &self.cancel).await;
            self.state.is_streaming = false;
            let outcome = outcome?;

            total_cost += outcome.cost;
            self.policy_ctx.cost_so_far += outcome.cost;

            let assistant = Message::assistant_parts(outcome.parts, Some(outcome.cost));
            self.state.push(assistant.clone());

            let calls: Vec<(String, String, String)> = assistant
                .parts
                .iter()
                .filter_map(|p| match p {
                    Part::ToolCall {
                        id,
                        name,
                        args_json,
                    } => Some((id.clone(), name.clone(), args_json.clone())),
                    _ => None,
                })
                .collect();

            if calls.is_empty() || outcome.stop_reason != StopReason::ToolUse {
                self.feed_turn(&TurnObservation {
                    turn,
                    role: vyuha_model::Role::Assistant,
                    content: assistant.text(),
                    tool_calls: vec![],
                    tool_results: vec![],
                });
                self.bus.emit(&Event::TurnDone {
                    session_id: session_id.clone(),
                    turn,
                    reason: stop_label(outcome.stop_reason),
                });
                self.record_heartbeat(turn, "turn:done");
                return Ok(TurnLoopRun {
                    final_message: assistant,
                    cause: terminal_cause(outcome.stop_reason),
                    turns_used: turn,
                    total_cost,
                });
            }

            let mut result_parts: Vec<Part> = Vec::with_capacity(calls.len());
            let mut result_views: Vec<ToolResultView> = Vec::with_capacity(calls.len());
            for (call_id, name, args_json) in &calls {
                self.cancel.check()?;
                self.bus.emit(&Event::ToolStart {
                    session_id: session_id.clone(),
                    call_id: call_id.clone(),
                    name: name.clone(),
                });

                let args: Value = match serde_json::from_str(args_json) {
                    Ok(v) => v,
                    Err(e) => {
                        let msg = format!("invalid tool arguments: {e}");
                        warn!(tool = %name, %msg, "tool argument parse failed");
                        self.capture_failure(&session_id, call_id, name, msg, &mut result_parts, &mut result_views);
                        continue;
                    }
                };

                let kind = self
                    .tools
                    .get(name)
                    .map(|t| t.action_kind())
                    .unwrap_or(ActionKind::ToolCall);
                let action = Action {
                    kind,
                    tool_name: name,
                    args: &args,
                };
                let decision = self.policy.evaluate(&action, &self.policy_ctx);
                for (rule, reason) in &decision.warnings {
                    warn!(tool = %name, rule = %rule, %reason, "policy warning");
                }
                if let Some((rule, reason)) = &decision.denied_by {
                    let msg = format!("denied by policy rule {rule}: {reason}");
                    self.capture_failure(&session_id, call_id, name, msg, &mut result_parts, &mut result_views);
                    continue;
                }

                if self.autonomy.is_disabled(name) {
                    let msg =
                        format!("tool {name} is temporarily disabled after repeated failures");
                    self.capture_failure(&session_id, call_id, name, msg, &mut result_parts, &mut result_views);
                    continue;
                }

                let call = ToolCall {
                    id: call_id.clone(),
                    name: name.clone(),
                    args: args.clone(),
                };
                let tool_ctx = ToolContext::new(&session_id, &self.working_dir)
                    .with_cancel(self.cancel.child());
                let started = Instant::now();
                let output = self.tools.execute(&call, &tool_ctx).await;
                let duration_ms = started.elapsed().as_millis() as u64;

                self.autonomy.record_result(name, !output.is_error);
                self.track_side_effects(kind, &args);
                for obs in &self.observers {
                    obs.on_tool(&ToolObservation {
                        name: name.clone(),
                        duration_ms,
                        success: !output.is_error,
                    });
                }

                if output.is_error {
                    self.bus.emit(&Event::ToolError {
                        session_id: session_id.clone(),
                        call_id: call_id.clone(),
                        name: name.clone(),
                        message: output.content.clone(),
                    });
                } else {
                    self.bus.emit(&Event::ToolDone {
                        session_id: session_id.clone(),
                        call_id: call_id.clone(),
                        name: name.clone(),
                        duration_ms,
                    });
                }
                result_views.push(ToolResultView {
                    name: name.clone(),
                    is_error: output.is_error,
                });
                result_parts.push(Part::tool_result(call_id, output.content, output.is_error));
            }

            self.state.push(Message::tool_results(result_parts));
            self.feed_turn(&TurnObservation {
                turn,
                role: vyuha_model::Role::Assistant,
                content: assistant.text(),
                tool_calls: calls
                    .iter()
                    .map(|(_, name, args_json)| ToolCallView {
                        name: name.clone(),
                        args_json: args_json.clone(),
                    })
                    .collect(),
                tool_results: result_views,
            });
            self.bus.emit(&Event::TurnDone {
                session_id: session_id.clone(),
                turn,
                reason: "tool_use",
            });
            self.record_heartbeat(turn, "turn:done");
        }

        self.cancel.check()?;
        let synthetic = Message::assistant("[max turns reached]");
        self.state.push(synthetic.clone());
        Ok(TurnLoopRun {
            final_message: synthetic,
            cause: StopCause::MaxTurns,
            turns_used: turn,
            total_cost,
        })
    }

    /// Record a local tool failure as an error result so the model can
    /// react; the loop continues with the remaining calls.
    fn capture_failure(
        &self,
        session_id: &str,
        call_id: &str,
        name: &str,
        message: String,
        result_parts: &mut Vec<Part>,
        result_views: &mut Vec<ToolResultView>,
    ) {
        self.bus.emit(&Event::ToolError {
            session_id: session_id.to_string(),
            call_id: call_id.to_string(),
            name: name.to_string(),
            message: message.clone(),
        });
        result_views.push(ToolResultView {
            name: name.to_string(),
            is_error: true,
        });
        result_parts.push(Part::tool_result(call_id, message, true));
    }

    fn track_side_effects(&mut self, kind: ActionKind, args: &Value) {
        match kind {
            ActionKind::FileWrite | ActionKind::FileDelete => {
                if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
                    self.policy_ctx.files_modified.push(PathBuf::from(path));
                }
            }
            ActionKind::ShellExec => {
                if let Some(cmd) = args.get("command").and_then(|v| v.as_str()) {
                    self.policy_ctx.commands_run.push(cmd.to_string());
                }
            }
            _ => {}
        }
    }

    fn feed_turn(&self, observation: &TurnObservation) {
        for obs in &self.observers {
            obs.on_turn(observation);
        }
    }

    fn record_heartbeat(&self, turn: u32, phase: &'static str) {
        if !self.config.heartbeat {
            return;
        }
        self.heartbeats.lock().unwrap().push(Heartbeat {
            turn,
            phase,
            at: Utc::now(),
        });
    }
}

fn stop_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "end_turn",
        StopReason::ToolUse => "tool_use",
        StopReason::MaxTokens => "max_tokens",
        StopReason::StopSequence => "stop_sequence",
    }
}

fn terminal_cause(reason: StopReason) -> StopCause {
    match reason {
        StopReason::EndTurn => StopCause::EndTurn,
        StopReason::MaxTokens => StopCause::MaxTokens,
        StopReason::StopSequence => StopCause::StopSequence,
        StopReason::ToolUse => StopCause::NoToolCalls,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
