// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::policy::ActionKind;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Built-in tool that lists a directory, one entry per line, directories
/// suffixed with `/`.
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path (default: working directory)" }
            }
        })
    }

    fn action_kind(&self) -> ActionKind {
        ActionKind::FileRead
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let full = ctx.working_dir.join(path);

        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(e) => e,
            Err(e) => return ToolOutput::err(&call.id, format!("list error: {e}")),
        };
        let mut lines = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            lines.push(if is_dir { format!("{name}/") } else { name });
        }
        lines.sort();
        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
