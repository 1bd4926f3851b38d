// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use vyuha_memory::RecallEngine;
use vyuha_tools::{Tool, ToolCall, ToolContext, ToolOutput};

/// Tool surface over the unified recall engine, so agents can query their
/// own memory mid-turn.  Results come back one per line, best first, each
/// prefixed with its fused score.
pub struct RecallTool {
    engine: Arc<RecallEngine>,
}

impl RecallTool {
    pub fn new(engine: Arc<RecallEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Search long-term memory for items relevant to a query. \
         Returns the best matches with relevance scores."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let query = match call.args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q,
            None => return ToolOutput::err(&call.id, "missing 'query'"),
        };
        let hits = self.engine.recall(query, Utc::now());
        if hits.is_empty() {
            return ToolOutput::ok(&call.id, "no matching memories");
        }
        let lines: Vec<String> = hits
            .iter()
            .map(|h| format!("[{:.4}] {}", h.score, h.id))
            .collect();
        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
