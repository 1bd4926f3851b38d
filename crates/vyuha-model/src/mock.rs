// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    provider::EventStream, CompletionRequest, ProviderEvent, Role, StopReason, Usage,
};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<EventStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_else(|| "[no input]".into());

        let events: Vec<anyhow::Result<ProviderEvent>> = vec![
            Ok(ProviderEvent::Start),
            Ok(ProviderEvent::Text(format!("MOCK: {reply}"))),
            Ok(ProviderEvent::Usage(Usage {
                input_tokens: 10,
                output_tokens: 10,
            })),
            Ok(ProviderEvent::Done {
                stop_reason: StopReason::EndTurn,
                cost: 0.0,
            }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock provider.  Each call to `stream` pops the next
/// response script from the front of the queue.  This lets tests specify
/// exact event sequences – including tool calls and mid-stream errors –
/// without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<ProviderEvent>>>>,
    /// The last `CompletionRequest` seen by this provider.
    /// Written on each `stream()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from a list of response scripts.
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// sequence of [`ProviderEvent`]s emitted for that call.
    pub fn new(scripts: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// One complete text-only response script ending in `end_turn`.
    pub fn text_script(reply: impl Into<String>) -> Vec<ProviderEvent> {
        vec![
            ProviderEvent::Start,
            ProviderEvent::Text(reply.into()),
            ProviderEvent::Usage(Usage {
                input_tokens: 5,
                output_tokens: 5,
            }),
            ProviderEvent::Done {
                stop_reason: StopReason::EndTurn,
                cost: 0.001,
            },
        ]
    }

    /// One response script that requests the given tool calls and stops with
    /// `tool_use`.
    pub fn tool_call_script(calls: Vec<(&str, &str, &str)>) -> Vec<ProviderEvent> {
        let mut events = vec![ProviderEvent::Start];
        for (id, name, args_json) in calls {
            events.push(ProviderEvent::ToolCall {
                id: id.into(),
                name: name.into(),
                args_json: args_json.into(),
            });
        }
        events.push(ProviderEvent::Usage(Usage {
            input_tokens: 5,
            output_tokens: 5,
        }));
        events.push(ProviderEvent::Done {
            stop_reason: StopReason::ToolUse,
            cost: 0.001,
        });
        events
    }

    /// Convenience: provider that returns a tool call followed by a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        let id = tool_id.into();
        let name = tool_name.into();
        let args = args_json.into();
        Self::new(vec![
            Self::tool_call_script(vec![(id.as_str(), name.as_str(), args.as_str())]),
            Self::text_script(final_text),
        ])
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<EventStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                Self::text_script("[no more scripts]")
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<ProviderEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
