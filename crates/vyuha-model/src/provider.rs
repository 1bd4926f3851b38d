// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ProviderEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<ProviderEvent>> + Send>>;

/// A streaming language-model provider.
///
/// Implementations own authentication, rate limiting, and wire parsing;
/// the core consumes the normalized event stream only.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<EventStream>;
}
