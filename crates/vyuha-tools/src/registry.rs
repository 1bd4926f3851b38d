// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// A tool schema – mirrors the model crate's schema type but keeps the tools
/// crate independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
///
/// `execute` is the tool executor of the runtime: it resolves the handler,
/// validates arguments against the declared schema, and captures every
/// failure mode — including handler panics — into an error [`ToolOutput`].
/// It never fails itself.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let tool = match self.tools.get(&call.name) {
            Some(t) => Arc::clone(t),
            None => {
                return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
            }
        };

        if let Err(msg) = validate_args(&call.args, &tool.parameters_schema()) {
            return ToolOutput::err(
                &call.id,
                format!("invalid arguments for {}: {msg}", call.name),
            );
        }

        // Panics inside a handler must not take down the turn loop.
        match std::panic::AssertUnwindSafe(tool.execute(call, ctx))
            .catch_unwind()
            .await
        {
            Ok(output) => output,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                warn!(tool = %call.name, %msg, "tool handler panicked");
                ToolOutput::err(&call.id, format!("tool panicked: {msg}"))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate `args` against a JSON-Schema-shaped `parameters` object.
///
/// This is not a full JSON Schema implementation: it checks that the
/// arguments are an object, that every `required` property is present, and
/// that present properties match their declared primitive `type`.  That is
/// the contract the executor must enforce before a handler runs.
fn validate_args(args: &Value, schema: &Value) -> Result<(), String> {
    let obj = match args {
        Value::Object(o) => o,
        other => return Err(format!("expected an object, got {other}")),
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|v| v.as_str()) {
            if !obj.contains_key(name) {
                return Err(format!("missing required property '{name}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, value) in obj {
            let Some(decl) = props.get(name) else { continue };
            let Some(expected) = decl.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!("property '{name}' is not of type {expected}"));
            }
        }
    }

    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

    /// Minimal no-op tool for registry tests.
    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "x": { "type": "integer" } },
                "required": ["x"]
            })
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            panic!("deliberate test panic");
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("s1", "/tmp")
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        assert!(reg.get("echo").is_some());
    }

    #[test]
    fn get_unknown_returns_none() {
        let reg = ToolRegistry::new();
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn names_are_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "b" });
        reg.register(EchoTool { name: "a" });
        assert_eq!(reg.names(), vec!["a", "b"]);
    }

    #[test]
    fn schemas_contains_registered_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "my_tool" });
        let schemas = reg.schemas();
        assert!(schemas.iter().any(|s| s.name == "my_tool"));
        assert_eq!(schemas[0].description, "echoes its input");
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let call = ToolCall {
            id: "1".into(),
            name: "echo".into(),
            args: json!({"x": 1}),
        };
        let out = reg.execute(&call, &ctx()).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error() {
        let reg = ToolRegistry::new();
        let call = ToolCall {
            id: "x".into(),
            name: "missing".into(),
            args: json!({}),
        };
        let out = reg.execute(&call, &ctx()).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn missing_required_arg_fails_before_invocation() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let call = ToolCall {
            id: "1".into(),
            name: "echo".into(),
            args: json!({}),
        };
        let out = reg.execute(&call, &ctx()).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing required property 'x'"));
    }

    #[tokio::test]
    async fn wrong_arg_type_fails_before_invocation() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let call = ToolCall {
            id: "1".into(),
            name: "echo".into(),
            args: json!({"x": "not-an-int"}),
        };
        let out = reg.execute(&call, &ctx()).await;
        assert!(out.is_error);
        assert!(out.content.contains("not of type integer"));
    }

    #[tokio::test]
    async fn non_object_args_fail_before_invocation() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let call = ToolCall {
            id: "1".into(),
            name: "echo".into(),
            args: json!([1, 2, 3]),
        };
        let out = reg.execute(&call, &ctx()).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn panicking_tool_is_captured_as_error_output() {
        let mut reg = ToolRegistry::new();
        reg.register(PanicTool);
        let call = ToolCall {
            id: "p1".into(),
            name: "panic".into(),
            args: json!({}),
        };
        let out = reg.execute(&call, &ctx()).await;
        assert!(out.is_error);
        assert!(out.content.contains("panicked"));
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        reg.register(EchoTool { name: "t" });
        assert_eq!(reg.names().len(), 1);
    }
}
