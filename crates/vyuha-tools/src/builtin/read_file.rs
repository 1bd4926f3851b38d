// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ActionKind;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

const READ_LIMIT: usize = 200_000;

/// Built-in tool that reads a UTF-8 file relative to the working directory.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file and return its contents. Paths are resolved against the working directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path" }
            },
            "required": ["path"]
        })
    }

    fn action_kind(&self) -> ActionKind {
        ActionKind::FileRead
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing 'path'"),
        };
        let full = ctx.working_dir.join(path);
        debug!(path = %full.display(), "read_file tool");

        match tokio::fs::read(&full).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let content = if text.len() > READ_LIMIT {
                    format!("{}...[truncated]", &text[..READ_LIMIT])
                } else {
                    text.to_string()
                };
                ToolOutput::ok(&call.id, content)
            }
            Err(e) => ToolOutput::err(&call.id, format!("read error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let ctx = ToolContext::new("s1", dir.path());
        let call = ToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            args: json!({"path": "a.txt"}),
        };
        let out = ReadFileTool.execute(&call, &ctx).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "hello");
    }

    #[tokio::test]
    async fn missing_file_is_error_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("s1", dir.path());
        let call = ToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            args: json!({"path": "nope.txt"}),
        };
        let out = ReadFileTool.execute(&call, &ctx).await;
        assert!(out.is_error);
        assert!(out.content.contains("read error"));
    }

    #[tokio::test]
    async fn missing_path_arg_is_error_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("s1", dir.path());
        let call = ToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            args: json!({}),
        };
        let out = ReadFileTool.execute(&call, &ctx).await;
        assert!(out.is_error);
    }
}
