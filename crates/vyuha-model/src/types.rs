use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a message.
///
/// Messages are sequences of parts: a plain assistant reply is one `Text`
/// part; an assistant turn that requests tools carries one `ToolCall` part
/// per request; the answering message carries one `ToolResult` part per call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    /// Extended-thinking/reasoning content.  Kept out of `text()` so that
    /// reasoning never leaks into tool arguments or transcripts meant for
    /// downstream consumers.
    Thinking {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// JSON-encoded argument object, forwarded verbatim from the model.
        args_json: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
    Image {
        media_type: String,
        /// Base64 payload.
        data: String,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            args_json: args_json.into(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    pub timestamp: DateTime<Utc>,
    /// Provider-reported cost of producing this message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Message {
    fn with_parts(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            timestamp: Utc::now(),
            cost: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_parts(Role::System, vec![Part::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_parts(Role::User, vec![Part::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_parts(Role::Assistant, vec![Part::text(text)])
    }

    /// Assistant message from accumulated stream parts (text, thinking, tool
    /// calls) with the provider-reported cost attached.
    pub fn assistant_parts(parts: Vec<Part>, cost: Option<f64>) -> Self {
        let mut m = Self::with_parts(Role::Assistant, parts);
        m.cost = cost;
        m
    }

    /// One message answering every tool call of the preceding assistant turn.
    /// `parts` must be `Part::ToolResult` entries in tool-call order.
    pub fn tool_results(parts: Vec<Part>) -> Self {
        Self::with_parts(Role::ToolResult, parts)
    }

    /// Concatenated plain text of this message.  Thinking, tool calls, tool
    /// results, and images are excluded.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for p in &self.parts {
            if let Part::Text { text } = p {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// All tool-call parts, in emission order.
    pub fn tool_calls(&self) -> Vec<&Part> {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::ToolCall { .. }))
            .collect()
    }

    /// Approximate token count used for context management.
    ///
    /// Uses a 4-chars-per-token heuristic for text; images use a flat
    /// conservative estimate.
    pub fn approx_tokens(&self) -> usize {
        let chars: usize = self
            .parts
            .iter()
            .map(|p| match p {
                Part::Text { text } | Part::Thinking { text } => text.len(),
                Part::ToolCall {
                    name, args_json, ..
                } => name.len() + args_json.len(),
                Part::ToolResult { content, .. } => content.len(),
                Part::Image { .. } => 765 * 4,
            })
            .sum();
        (chars / 4).max(1)
    }
}

// ─── Provider request / response types ────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Sampling and budget options forwarded to the provider.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Extended-thinking token budget; `None` disables thinking.
    pub thinking_budget: Option<u32>,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub options: RequestOptions,
}

/// Why the model stopped emitting output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Token usage from one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A single streamed event from a model provider.
///
/// The stream contract: `Start` occurs exactly once and first; `Done` occurs
/// exactly once and last, carrying the stop reason and the cost of the
/// completion; `Error` terminates the stream.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Start,
    /// A text delta.
    Text(String),
    /// A thinking/reasoning delta.
    Thinking(String),
    /// The model requests a tool invocation.  Arguments arrive complete.
    ToolCall {
        id: String,
        name: String,
        args_json: String,
    },
    Usage(Usage),
    Done {
        stop_reason: StopReason,
        cost: f64,
    },
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Message construction ──────────────────────────────────────────────────

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.text(), "hello");
    }

    #[test]
    fn message_assistant_sets_role_and_text() {
        let m = Message::assistant("reply");
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.text(), "reply");
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(Message::user("a").id, Message::user("a").id);
    }

    #[test]
    fn assistant_parts_attaches_cost() {
        let m = Message::assistant_parts(vec![Part::text("x")], Some(0.01));
        assert_eq!(m.cost, Some(0.01));
    }

    #[test]
    fn tool_results_message_has_tool_result_role() {
        let m = Message::tool_results(vec![Part::tool_result("c1", "ok", false)]);
        assert_eq!(m.role, Role::ToolResult);
        assert_eq!(m.parts.len(), 1);
    }

    #[test]
    fn text_excludes_thinking_and_tool_parts() {
        let m = Message::assistant_parts(
            vec![
                Part::Thinking {
                    text: "hmm".into(),
                },
                Part::text("visible"),
                Part::tool_call("c1", "read", "{}"),
            ],
            None,
        );
        assert_eq!(m.text(), "visible");
    }

    #[test]
    fn tool_calls_returns_calls_in_order() {
        let m = Message::assistant_parts(
            vec![
                Part::tool_call("c1", "read", "{}"),
                Part::text("and"),
                Part::tool_call("c2", "edit", "{}"),
            ],
            None,
        );
        let calls = m.tool_calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], Part::ToolCall { id, .. } if id == "c1"));
        assert!(matches!(calls[1], Part::ToolCall { id, .. } if id == "c2"));
    }

    // ── Token approximation ───────────────────────────────────────────────────

    #[test]
    fn approx_tokens_text_divides_by_four() {
        let m = Message::user("12345678");
        assert_eq!(m.approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        let m = Message::user("hi");
        assert_eq!(m.approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_tool_call_uses_name_plus_args() {
        let m = Message::assistant_parts(vec![Part::tool_call("id", "aaaa", "bbbbbbbb")], None);
        // 4 + 8 chars → 3 tokens
        assert_eq!(m.approx_tokens(), 3);
    }

    #[test]
    fn approx_tokens_image_uses_flat_estimate() {
        let m = Message::assistant_parts(
            vec![Part::Image {
                media_type: "image/png".into(),
                data: "A".into(),
            }],
            None,
        );
        assert_eq!(m.approx_tokens(), 765);
    }

    // ── Serialisation round-trip ──────────────────────────────────────────────

    #[test]
    fn message_serialises_and_deserialises() {
        let original = Message::user("test payload");
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.role, Role::User);
        assert_eq!(decoded.text(), "test payload");
    }

    #[test]
    fn part_tool_call_round_trip() {
        let p = Part::tool_call("c1", "shell", r#"{"command":"ls"}"#);
        let json = serde_json::to_string(&p).unwrap();
        let back: Part = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn role_tool_result_serialises_snake_case() {
        let json = serde_json::to_string(&Role::ToolResult).unwrap();
        assert_eq!(json, "\"tool_result\"");
    }

    #[test]
    fn stop_reason_serialises_snake_case() {
        let json = serde_json::to_string(&StopReason::ToolUse).unwrap();
        assert_eq!(json, "\"tool_use\"");
    }

    #[test]
    fn message_without_cost_omits_field() {
        let json = serde_json::to_string(&Message::user("x")).unwrap();
        assert!(!json.contains("\"cost\""));
    }
}
