// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("edge {0} not found")]
    EdgeNotFound(String),

    #[error("edge {0} is already superseded")]
    EdgeSuperseded(String),

    #[error("a current edge already exists for ({source_node}, {target}, {relationship}); supersede it instead")]
    CurrentEdgeExists {
        source_node: String,
        target: String,
        relationship: String,
    },

    #[error("invalid temporal window: valid_from {valid_from} is after valid_until {valid_until}")]
    InvalidWindow {
        valid_from: chrono::DateTime<chrono::Utc>,
        valid_until: chrono::DateTime<chrono::Utc>,
    },

    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}
