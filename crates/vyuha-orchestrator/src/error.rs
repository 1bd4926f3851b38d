// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("workflow invalid: {0}")]
    DagValidation(String),

    #[error("no agent slots registered")]
    NoSlots,

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("state persistence failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}
