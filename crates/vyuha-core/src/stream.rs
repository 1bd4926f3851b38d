// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use futures::StreamExt;
use tracing::warn;

use vyuha_model::{EventStream, Part, ProviderEvent, StopReason, Usage};
use vyuha_tools::cancel::CancellationToken;

use crate::bus::EventBus;
use crate::error::CoreError;
use crate::events::Event;

/// Everything one completed model stream produced.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Assembled assistant parts: thinking first, then text, then tool calls
    /// in emission order.
    pub parts: Vec<Part>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    pub cost: f64,
}

/// Drive one provider stream to completion, normalizing it into a
/// [`StreamOutcome`] and emitting `stream:*` telemetry.
///
/// Contract enforced on the provider event sequence: `Start` occurs exactly
/// once and first; `Done` occurs exactly once and terminates the stream;
/// `Error` terminates with [`CoreError::Stream`]; cancellation observed
/// before `Done` yields [`CoreError::Cancelled`] and stops pulling.
pub async fn collect_stream(
    mut stream: EventStream,
    session_id: &str,
    bus: &EventBus,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, CoreError> {
    let mut started = false;
    let mut text = String::new();
    let mut thinking = String::new();
    let mut tool_calls: Vec<Part> = Vec::new();
    let mut usage = Usage::default();

    loop {
        cancel.check()?;
        let Some(event) = stream.next().await else {
            return Err(CoreError::Stream(
                "provider stream ended without a done event".into(),
            ));
        };
        let event = match event {
            Ok(ev) => ev,
            Err(e) => {
                let message = e.to_string();
                bus.emit(&Event::StreamError {
                    session_id: session_id.to_string(),
                    message: message.clone(),
                });
                return Err(CoreError::Stream(message));
            }
        };

        match event {
            ProviderEvent::Start => {
                if started {
                    return Err(CoreError::Stream("duplicate start event".into()));
                }
                started = true;
                bus.emit(&Event::StreamStart {
                    session_id: session_id.to_string(),
                });
            }
            _ if !started => {
                return Err(CoreError::Stream(
                    "provider emitted content before start".into(),
                ));
            }
            ProviderEvent::Text(delta) => {
                if !delta.is_empty() {
                    text.push_str(&delta);
                    bus.emit(&Event::StreamText {
                        session_id: session_id.to_string(),
                        delta,
                    });
                }
            }
            ProviderEvent::Thinking(delta) => {
                thinking.push_str(&delta);
                bus.emit(&Event::StreamThinking {
                    session_id: session_id.to_string(),
                    delta,
                });
            }
            ProviderEvent::ToolCall { id, name, args_json } => {
                // A call without a name cannot be dispatched; storing it
                // would corrupt the conversation sent back to the provider.
                if name.is_empty() {
                    warn!(call_id = %id, "dropping tool call with empty name from model");
                    continue;
                }
                bus.emit(&Event::StreamToolCall {
                    session_id: session_id.to_string(),
                    call_id: id.clone(),
                    name: name.clone(),
                });
                tool_calls.push(Part::tool_call(id, name, args_json));
            }
            ProviderEvent::Usage(u) => {
                usage = u;
                bus.emit(&Event::StreamUsage {
                    session_id: session_id.to_string(),
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                });
            }
            ProviderEvent::Done { stop_reason, cost } => {
                bus.emit(&Event::StreamDone {
                    session_id: session_id.to_string(),
                    stop_reason,
                    cost,
                });
                let mut parts = Vec::new();
                if !thinking.is_empty() {
                    parts.push(Part::Thinking { text: thinking });
                }
                if !text.is_empty() {
                    parts.push(Part::Text { text });
                }
                parts.extend(tool_calls);
                return Ok(StreamOutcome {
                    parts,
                    stop_reason,
                    usage,
                    cost,
                });
            }
            ProviderEvent::Error(message) => {
                bus.emit(&Event::StreamError {
                    session_id: session_id.to_string(),
                    message: message.clone(),
                });
                return Err(CoreError::Stream(message));
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
