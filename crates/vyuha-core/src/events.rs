// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use vyuha_model::StopReason;

/// Discriminants of the closed event taxonomy.  Subscriptions are keyed by
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TurnStart,
    TurnDone,
    StreamStart,
    StreamText,
    StreamThinking,
    StreamToolCall,
    StreamUsage,
    StreamDone,
    StreamError,
    ToolStart,
    ToolDone,
    ToolError,
}

impl EventKind {
    /// Canonical wire name (`turn:start`, `stream:text`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnStart => "turn:start",
            Self::TurnDone => "turn:done",
            Self::StreamStart => "stream:start",
            Self::StreamText => "stream:text",
            Self::StreamThinking => "stream:thinking",
            Self::StreamToolCall => "stream:tool_call",
            Self::StreamUsage => "stream:usage",
            Self::StreamDone => "stream:done",
            Self::StreamError => "stream:error",
            Self::ToolStart => "tool:start",
            Self::ToolDone => "tool:done",
            Self::ToolError => "tool:error",
        }
    }
}

/// Telemetry events emitted by the turn loop and stream consumption.
/// The payload schema is closed per kind.
#[derive(Debug, Clone)]
pub enum Event {
    TurnStart {
        session_id: String,
        turn: u32,
    },
    TurnDone {
        session_id: String,
        turn: u32,
        reason: &'static str,
    },
    StreamStart {
        session_id: String,
    },
    StreamText {
        session_id: String,
        delta: String,
    },
    StreamThinking {
        session_id: String,
        delta: String,
    },
    StreamToolCall {
        session_id: String,
        call_id: String,
        name: String,
    },
    StreamUsage {
        session_id: String,
        input_tokens: u32,
        output_tokens: u32,
    },
    StreamDone {
        session_id: String,
        stop_reason: StopReason,
        cost: f64,
    },
    StreamError {
        session_id: String,
        message: String,
    },
    ToolStart {
        session_id: String,
        call_id: String,
        name: String,
    },
    ToolDone {
        session_id: String,
        call_id: String,
        name: String,
        duration_ms: u64,
    },
    ToolError {
        session_id: String,
        call_id: String,
        name: String,
        message: String,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TurnStart { .. } => EventKind::TurnStart,
            Self::TurnDone { .. } => EventKind::TurnDone,
            Self::StreamStart { .. } => EventKind::StreamStart,
            Self::StreamText { .. } => EventKind::StreamText,
            Self::StreamThinking { .. } => EventKind::StreamThinking,
            Self::StreamToolCall { .. } => EventKind::StreamToolCall,
            Self::StreamUsage { .. } => EventKind::StreamUsage,
            Self::StreamDone { .. } => EventKind::StreamDone,
            Self::StreamError { .. } => EventKind::StreamError,
            Self::ToolStart { .. } => EventKind::ToolStart,
            Self::ToolDone { .. } => EventKind::ToolDone,
            Self::ToolError { .. } => EventKind::ToolError,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_for_every_variant() {
        let events = vec![
            Event::TurnStart { session_id: "s".into(), turn: 1 },
            Event::TurnDone { session_id: "s".into(), turn: 1, reason: "end_turn" },
            Event::StreamStart { session_id: "s".into() },
            Event::StreamText { session_id: "s".into(), delta: "x".into() },
            Event::StreamThinking { session_id: "s".into(), delta: "x".into() },
            Event::StreamToolCall {
                session_id: "s".into(),
                call_id: "c".into(),
                name: "read".into(),
            },
            Event::StreamUsage { session_id: "s".into(), input_tokens: 1, output_tokens: 2 },
            Event::StreamDone {
                session_id: "s".into(),
                stop_reason: StopReason::EndTurn,
                cost: 0.0,
            },
            Event::StreamError { session_id: "s".into(), message: "e".into() },
            Event::ToolStart {
                session_id: "s".into(),
                call_id: "c".into(),
                name: "read".into(),
            },
            Event::ToolDone {
                session_id: "s".into(),
                call_id: "c".into(),
                name: "read".into(),
                duration_ms: 3,
            },
            Event::ToolError {
                session_id: "s".into(),
                call_id: "c".into(),
                name: "read".into(),
                message: "e".into(),
            },
        ];
        // Every variant maps to a distinct kind with a stable wire name.
        let mut names: Vec<&str> = events.iter().map(|e| e.kind().as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 12);
    }

    #[test]
    fn wire_names_use_colon_namespaces() {
        assert_eq!(EventKind::TurnStart.as_str(), "turn:start");
        assert_eq!(EventKind::StreamToolCall.as_str(), "stream:tool_call");
        assert_eq!(EventKind::ToolError.as_str(), "tool:error");
    }
}
