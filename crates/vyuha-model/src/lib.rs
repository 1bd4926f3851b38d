// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod mock;
mod provider;
mod types;

pub use mock::{MockProvider, ScriptedProvider};
pub use provider::{EventStream, ModelProvider};
pub use types::{
    CompletionRequest, Message, Part, ProviderEvent, RequestOptions, Role, StopReason,
    ToolSchema, Usage,
};
