// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bandit::BanditSnapshot;
use crate::error::OrchestratorError;
use crate::scheduler::{StrategyBan, TaskPerformanceRecord};

/// Everything the autonomous orchestrator persists between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSnapshot {
    pub bandit: BanditSnapshot,
    pub history: Vec<TaskPerformanceRecord>,
    pub bans: Vec<StrategyBan>,
    pub version: u32,
}

/// Atomically write the snapshot: serialize to a sibling temp file, then
/// rename into place.
pub fn save_state(path: &Path, snapshot: &OrchestratorSnapshot) -> Result<(), OrchestratorError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(snapshot)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), outcomes = snapshot.history.len(), "orchestrator state saved");
    Ok(())
}

pub fn load_state(path: &Path) -> Result<OrchestratorSnapshot, OrchestratorError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
