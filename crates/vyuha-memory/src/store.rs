// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide memory state with an `init → use → flush → close` lifecycle.
//!
//! The store owns the edge log, the procedure index, and the transcript
//! directory under one home directory.  `flush` persists the mutable pieces
//! atomically (write to a temp file, then rename); transcripts are already
//! append-only on disk.  An in-memory mode backs tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{EdgeStore, GraphEdge, MemoryError, Procedure, ProcedureIndex, TranscriptLog};

const EDGE_LOG: &str = "edges.jsonl";
const PROCEDURE_FILE: &str = "procedures.json";

pub struct MemoryStore {
    home: Option<PathBuf>,
    edges: Arc<EdgeStore>,
    procedures: Mutex<ProcedureIndex>,
    transcripts: Option<TranscriptLog>,
    closed: Mutex<bool>,
}

impl MemoryStore {
    /// Open (or create) the persistent store rooted at `home_dir`.
    pub fn init(home_dir: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let home = home_dir.into();
        std::fs::create_dir_all(&home)?;

        let edges = Arc::new(EdgeStore::from_log(load_edge_log(&home.join(EDGE_LOG))?));
        let procedures = load_procedures(&home.join(PROCEDURE_FILE))?;
        debug!(
            home = %home.display(),
            edges = edges.len(),
            procedures = procedures.len(),
            "memory store opened"
        );

        Ok(Self {
            transcripts: Some(TranscriptLog::new(&home)),
            home: Some(home),
            edges,
            procedures: Mutex::new(procedures),
            closed: Mutex::new(false),
        })
    }

    /// Volatile store for tests: everything lives in memory, flush is a
    /// no-op, and transcripts are unavailable.
    pub fn in_memory() -> Self {
        Self {
            home: None,
            edges: Arc::new(EdgeStore::new()),
            procedures: Mutex::new(ProcedureIndex::new()),
            transcripts: None,
            closed: Mutex::new(false),
        }
    }

    pub fn edges(&self) -> &Arc<EdgeStore> {
        &self.edges
    }

    pub fn transcripts(&self) -> Option<&TranscriptLog> {
        self.transcripts.as_ref()
    }

    /// Run `f` against the procedure index under its lock.
    pub fn with_procedures<R>(&self, f: impl FnOnce(&mut ProcedureIndex) -> R) -> R {
        let mut index = self.procedures.lock().unwrap();
        f(&mut index)
    }

    /// Persist the edge log and procedure index.  Atomic per file: content
    /// is written to a sibling temp file and renamed into place.
    pub fn flush(&self) -> Result<(), MemoryError> {
        let Some(home) = &self.home else {
            return Ok(());
        };

        let edge_lines: String = self
            .edges
            .snapshot()
            .iter()
            .map(|e| serde_json::to_string(e).map(|l| l + "\n"))
            .collect::<Result<Vec<_>, _>>()?
            .concat();
        write_atomic(&home.join(EDGE_LOG), edge_lines.as_bytes())?;

        let list = self.procedures.lock().unwrap().to_list();
        let json = serde_json::to_vec_pretty(&list)?;
        write_atomic(&home.join(PROCEDURE_FILE), &json)?;

        debug!(edges = self.edges.len(), procedures = list.len(), "memory store flushed");
        Ok(())
    }

    /// Flush and mark the store closed.  Further closes are no-ops.
    pub fn close(&self) -> Result<(), MemoryError> {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return Ok(());
        }
        self.flush()?;
        *closed = true;
        Ok(())
    }
}

fn load_edge_log(path: &Path) -> Result<Vec<GraphEdge>, MemoryError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    let mut edges = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        edges.push(serde_json::from_str(line)?);
    }
    Ok(edges)
}

fn load_procedures(path: &Path) -> Result<ProcedureIndex, MemoryError> {
    if !path.exists() {
        return Ok(ProcedureIndex::new());
    }
    let text = std::fs::read_to_string(path)?;
    let list: Vec<Procedure> = serde_json::from_str(&text)?;
    Ok(ProcedureIndex::from_list(list))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MemoryError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
