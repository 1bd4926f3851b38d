// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod autonomy;
pub mod builtin;
pub mod cancel;
pub mod policy;
pub mod registry;
pub mod tool;

pub use autonomy::AutonomyGate;
pub use cancel::{CancelReason, CancellationToken, Cancelled};
pub use policy::{
    Action, ActionKind, PolicyContext, PolicyDecision, PolicyEngine, PolicyRule, RuleSeverity,
    Verdict,
};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall, ToolContext, ToolOutput};
