// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use vyuha_tools::cancel::{CancelReason, Cancelled};

/// Structural failures of the agent runtime.
///
/// Local, expected failures (tool errors, policy denials, malformed
/// arguments) never surface here — they are captured into the conversation
/// as error tool results so the model can react.  This enum covers the
/// failures that must propagate to the caller instead.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("operation cancelled ({reason:?})")]
    Cancelled { reason: CancelReason },

    #[error("model stream failed: {0}")]
    Stream(String),

    #[error("agent depth {depth} exceeds the maximum {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("agent {0} not found")]
    AgentNotFound(String),

    #[error("agent {0} is not in a terminal state")]
    AgentNotTerminal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<Cancelled> for CoreError {
    fn from(c: Cancelled) -> Self {
        Self::Cancelled { reason: c.reason }
    }
}

impl CoreError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
