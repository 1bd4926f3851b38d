// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ActionKind;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Built-in tool that writes a UTF-8 file, creating parent directories.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text content to a file, creating parent directories as needed. \
         Overwrites existing content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path" },
                "content": { "type": "string", "description": "Text content to write" }
            },
            "required": ["path", "content"]
        })
    }

    fn action_kind(&self) -> ActionKind {
        ActionKind::FileWrite
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing 'path'"),
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolOutput::err(&call.id, "missing 'content'"),
        };
        let full = ctx.working_dir.join(path);
        debug!(path = %full.display(), bytes = content.len(), "write_file tool");

        if let Some(parent) = full.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutput::err(&call.id, format!("mkdir error: {e}"));
                }
            }
        }
        match tokio::fs::write(&full, content).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("wrote {} bytes to {path}", content.len())),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
