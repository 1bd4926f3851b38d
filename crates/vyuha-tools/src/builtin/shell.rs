// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::ActionKind;
use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Built-in tool that runs a shell command in the working directory.
///
/// The command is raced against both the configured timeout and the
/// context's cancellation token; either aborts the child process.
pub struct ShellTool {
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its combined stdout/stderr output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command line" }
            },
            "required": ["command"]
        })
    }

    fn action_kind(&self) -> ActionKind {
        ActionKind::ShellExec
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'command'"),
        };
        debug!(%command, "shell tool");

        let mut child = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&ctx.working_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
        };

        let cancel = ctx.cancel.clone();
        let deadline = Duration::from_secs(self.timeout_secs);
        let waited = tokio::select! {
            r = tokio::time::timeout(deadline, child.wait_with_output()) => r,
            _ = async {
                loop {
                    if cancel.is_aborted() { break; }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            } => {
                return ToolOutput::err(&call.id, "command cancelled");
            }
        };

        match waited {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
                if output.status.success() {
                    ToolOutput::ok(&call.id, text)
                } else {
                    ToolOutput::err(
                        &call.id,
                        format!("exit status {}: {text}", output.status),
                    )
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("wait error: {e}")),
            Err(_) => ToolOutput::err(
                &call.id,
                format!("command timed out after {}s", self.timeout_secs),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ShellTool {
        ShellTool { timeout_secs: 5 }
    }

    #[tokio::test]
    async fn captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("s1", dir.path());
        let call = ToolCall {
            id: "c1".into(),
            name: "shell".into(),
            args: json!({"command": "echo hello"}),
        };
        let out = tool().execute(&call, &ctx).await;
        assert!(!out.is_error);
        assert_eq!(out.content.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("s1", dir.path());
        let call = ToolCall {
            id: "c1".into(),
            name: "shell".into(),
            args: json!({"command": "exit 3"}),
        };
        let out = tool().execute(&call, &ctx).await;
        assert!(out.is_error);
        assert!(out.content.contains("exit status"));
    }

    #[tokio::test]
    async fn pre_cancelled_context_aborts_command() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = crate::cancel::CancellationToken::new();
        cancel.cancel();
        let ctx = ToolContext::new("s1", dir.path()).with_cancel(cancel);
        let call = ToolCall {
            id: "c1".into(),
            name: "shell".into(),
            args: json!({"command": "sleep 30"}),
        };
        let out = tool().execute(&call, &ctx).await;
        assert!(out.is_error);
        assert!(out.content.contains("cancelled"));
    }

    #[tokio::test]
    async fn timeout_is_error_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("s1", dir.path());
        let call = ToolCall {
            id: "c1".into(),
            name: "shell".into(),
            args: json!({"command": "sleep 10"}),
        };
        let out = ShellTool { timeout_secs: 1 }.execute(&call, &ctx).await;
        assert!(out.is_error);
        assert!(out.content.contains("timed out"));
    }
}
